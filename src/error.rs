//! Error types for Nervus
//!
//! Four domain families mirror the stages of a run: schema problems and
//! architecture problems are fatal before training starts, task-strategy
//! problems abort the run mid-epoch, and resource problems are fatal for
//! training but reported per record during evaluation.

use std::path::PathBuf;
use thiserror::Error;

/// Problems found while reading or interpreting the CSV schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("No label column found (expected at least one column prefixed with 'label_')")]
    NoLabelColumn,

    #[error("Required column '{column}' is missing")]
    MissingColumn { column: String },

    #[error("Survival task requires a '{column}' column")]
    MissingPeriodColumn { column: String },

    #[error("Survival task requires exactly one label column, found {found}")]
    SurvivalLabelCount { found: usize },

    #[error("Duplicate identifier '{id}'")]
    DuplicateId { id: String },

    #[error("Record '{record}': invalid split '{value}' (must be train, val or test)")]
    InvalidSplit { record: String, value: String },

    #[error("Record '{record}': empty value in column '{column}'")]
    EmptyCell { record: String, column: String },

    #[error("Record '{record}': column '{column}' has non-numeric value '{value}'")]
    NonNumeric {
        record: String,
        column: String,
        value: String,
    },

    #[error("Record '{record}': event indicator in '{column}' must be 0 or 1, got '{value}'")]
    InvalidEvent {
        record: String,
        column: String,
        value: String,
    },

    #[error("Record '{record}': period must be a non-negative number, got '{value}'")]
    InvalidPeriod { record: String, value: String },

    #[error("Record '{record}': value '{value}' of '{column}' is not a known class")]
    UnknownClass {
        record: String,
        column: String,
        value: String,
    },

    #[error("Split '{split}' has no records")]
    EmptySplit { split: String },

    #[error("Record {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },
}

/// Problems assembling a network from the catalog
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArchitectureError {
    #[error("Unknown backbone '{name}'")]
    UnknownBackbone { name: String },

    #[error("Empty model selection")]
    EmptySelection,

    #[error("Model '{model}' combines more than one image backbone")]
    MultipleImageBackbones { model: String },

    #[error("Model '{model}' combines more than one tabular network")]
    MultipleTabularNetworks { model: String },

    #[error("Model '{model}' needs an image column, but the schema has none")]
    MissingImageColumn { model: String },

    #[error("Model '{model}' needs tabular input columns, but the schema has none")]
    MissingTabularColumns { model: String },

    #[error("Input channels must be 1 or 3, got {channels}")]
    InvalidChannels { channels: usize },

    #[error("Backbone '{backbone}' needs an image size divisible by {patch}, got {size}")]
    InvalidImageSize {
        backbone: String,
        size: usize,
        patch: usize,
    },

    #[error("Backbone '{backbone}' expected {expected} input values for the batch, got {got}")]
    InputLength {
        backbone: String,
        expected: usize,
        got: usize,
    },

    #[error("Composed {heads} heads for {labels} label columns")]
    HeadCount { heads: usize, labels: usize },

    #[error("Batch is missing the '{modality}' input required by the model")]
    MissingInput { modality: String },
}

/// Problems computing a loss or metric for the chosen task
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskStrategyError {
    #[error("Label '{label}' has fewer than two observed classes ({found})")]
    SingleClass { label: String, found: usize },

    #[error("Survival batch needs at least two records, got {records}")]
    SurvivalBatchTooSmall { records: usize },

    #[error("Survival batch needs at least two distinct periods")]
    NoDistinctTimes,

    #[error("Expected {expected} output heads, got {got}")]
    HeadMismatch { expected: usize, got: usize },

    #[error("Head '{label}' produced a non-finite loss")]
    NonFiniteLoss { label: String },

    #[error("Criterion '{criterion}' does not apply to task '{task}'")]
    CriterionMismatch { criterion: String, task: String },

    #[error("Head '{label}': no records to score")]
    EmptyEvaluation { label: String },

    #[error("Cannot append {found} targets to {expected} targets")]
    TargetKindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Missing or unusable external resources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Record '{record}': image not found at {path}")]
    ImageNotFound { record: String, path: PathBuf },

    #[error("Record '{record}': cannot decode image {path}: {reason}")]
    ImageDecode {
        record: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Accelerator '{id}' is not available in this build")]
    DeviceUnavailable { id: String },

    #[error("No checkpoints found in {dir}")]
    NoCheckpoints { dir: PathBuf },

    #[error("No training runs found under {dir}")]
    NoRuns { dir: PathBuf },
}

impl ResourceError {
    /// Record the failure belongs to, for per-record reporting
    pub fn record(&self) -> Option<&str> {
        match self {
            ResourceError::ImageNotFound { record, .. }
            | ResourceError::ImageDecode { record, .. } => Some(record),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Architecture error: {0}")]
    Architecture(#[from] ArchitectureError),

    #[error("Task strategy error: {0}")]
    TaskStrategy(#[from] TaskStrategyError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
