//! Checkpoint I/O
//!
//! A checkpoint stores the weights of a composed model together with the
//! architecture spec needed to rebuild it, so evaluation never depends on
//! the configuration that trained the model.

mod format;
mod load;
mod model;
mod save;


pub use format::{CheckpointFormat, SaveConfig};
pub use load::load_checkpoint;
pub use model::{Checkpoint, CheckpointMetadata, CheckpointState, ParameterInfo};
pub use save::save_checkpoint;

#[cfg(test)]
pub(crate) use model::tests::tabular_spec;
