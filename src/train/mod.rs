//! Training loop and checkpoint policy
//!
//! A run moves through [`TrainingState`]s: each epoch trains over every
//! batch, validates forward-only, then lets [`RunState::observe`] decide
//! whether the weights are persisted.
//!
//! ```no_run
//! use nervus::train::{RunDirectory, Trainer, TrainerConfig};
//! # use nervus::{data::DataLoader, network::ComposedModel, task::TaskStrategy};
//! # fn run(model: ComposedModel, strategy: TaskStrategy, train: DataLoader, val: DataLoader) -> nervus::Result<()> {
//! use nervus::io::CheckpointFormat;
//! use nervus::optim::Adam;
//!
//! let mut trainer = Trainer::new(model, strategy, Box::new(Adam::default_params(1e-3)), TrainerConfig::default());
//! let mut run = RunDirectory::create("results", CheckpointFormat::SafeTensors)?;
//! let result = trainer.train(&train, &val, &mut run)?;
//! println!("best epoch: {:?}", result.best_epoch);
//! # Ok(())
//! # }
//! ```

pub mod callback;
mod checkpoint;
mod history;
mod state;
mod trainer;

pub use callback::{
    CallbackAction, CallbackContext, CallbackManager, ProgressCallback, TrainerCallback,
};
pub use checkpoint::{
    checkpoint_file_name, latest_weights_dir, list_checkpoints, CheckpointSink, RunDirectory,
    LEARNING_CURVE_FILE, PARAMETERS_FILE, WEIGHTS_DIR,
};
pub use history::{EpochLosses, LossAccumulator, LossHistory, SplitLoss};
pub use state::{CheckpointDecision, CheckpointPolicy, RunState, TieBreak, TrainingState};
pub use trainer::{TrainResult, Trainer, TrainerConfig};
