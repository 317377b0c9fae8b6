//! # Nervus: schema-driven multi-task training
//!
//! Trains and evaluates models over tabular clinical variables and/or
//! images for classification, regression and DeepSurv survival analysis.
//! The study CSV alone decides how many heads the model gets, which loss
//! and metric apply, and which sub-networks are fused.
//!
//! ## Architecture
//!
//! - **schema**: CSV conventions and task inference
//! - **network**: backbone catalog and architecture composer
//! - **task**: losses and metrics per task family
//! - **data**: sampling, augmentation and batch production
//! - **autograd**: tape-based automatic differentiation
//! - **optim**: Optimizers (SGD, Adadelta, RMSprop, Adam, AdamW, RAdam)
//! - **train**: training loop, run state and checkpoint policy
//! - **eval**: forward-only evaluation of persisted checkpoints
//! - **io**: checkpoint saving and loading (JSON, YAML, SafeTensors)
//! - **config**: Declarative YAML configuration and CLI

pub mod autograd;
pub mod config;
pub mod data;
pub mod device;
pub mod eval;
pub mod io;
pub mod network;
pub mod optim;
pub mod pipeline;
pub mod schema;
pub mod task;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Tensor};
pub use error::{Error, Result};
