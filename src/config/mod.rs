//! Declarative YAML configuration
//!
//! A run is described by a YAML file, optionally overridden from the
//! command line.
//!
//! # Example
//!
//! ```yaml
//! data:
//!   csvpath: materials/docs/trials.csv
//!   batch_size: 64
//!   sampler: yes
//!
//! model:
//!   name: MLP+ResNet18
//!   pretrained: true
//!
//! task:
//!   criterion: CEL
//!
//! optimizer:
//!   name: adam
//!   lr: 1e-4
//!
//! training:
//!   epochs: 50
//!   save_weight_policy: best
//! ```

mod builder;
mod cli;
mod schema;
mod train;
mod validate;

pub use builder::build_optimizer;
pub use cli::{
    apply_overrides, parse_args, spec_from_flags, Cli, Command, InfoArgs, OutputFormat, TestArgs,
    TrainArgs, ValidateArgs,
};
pub use schema::{
    DataConfig, EvaluationParams, ModelSpec, OptimSpec, TaskSpec, TrainSpec, TrainingParams,
};
pub use train::{load_config, parse_config};
pub use validate::{parse_splits, validate_config, ValidationError, OPTIMIZERS};
