//! Optimizers for training neural networks
//!
//! Each optimizer updates parameters in place from the gradients left by the
//! backward pass. Names accepted on the command line are resolved by
//! [`crate::config::build_optimizer`].

mod adadelta;
mod adam;
mod adamw;
mod clip;
mod optimizer;
mod radam;
mod rmsprop;
mod sgd;


pub use adadelta::Adadelta;
pub use adam::Adam;
pub use adamw::AdamW;
pub use clip::clip_grad_norm;
pub use optimizer::Optimizer;
pub use radam::RAdam;
pub use rmsprop::RMSprop;
pub use sgd::SGD;
