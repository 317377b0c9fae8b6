//! YAML schema of a training run

use crate::data::{Augmentation, Sampler};
use crate::io::CheckpointFormat;
use crate::network::DEFAULT_IMAGE_SIZE;
use crate::schema::TaskKind;
use crate::task::CensoringRule;
use crate::train::{CheckpointPolicy, TieBreak};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Complete run specification
///
/// ```yaml
/// data:
///   csvpath: materials/docs/trials.csv
///   batch_size: 64
///   sampler: class_balanced
/// model:
///   name: MLP+ResNet18
///   pretrained: true
/// task:
///   criterion: CEL
/// optimizer:
///   name: adam
///   lr: 0.0001
/// training:
///   epochs: 50
///   save_weight_policy: best
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSpec {
    pub data: DataConfig,

    pub model: ModelSpec,

    #[serde(default)]
    pub task: TaskSpec,

    pub optimizer: OptimSpec,

    #[serde(default)]
    pub training: TrainingParams,

    #[serde(default)]
    pub evaluation: EvaluationParams,
}

/// Where records come from and how they are batched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    pub csvpath: PathBuf,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub sampler: Sampler,

    #[serde(default)]
    pub augmentation: Augmentation,

    #[serde(default = "default_true")]
    pub normalize_image: bool,

    /// Image channels fed to the backbone (1 or 3)
    #[serde(default = "default_in_channel")]
    pub in_channel: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Backbone selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// `MLP`, `ResNet18`, `MLP+ResNet18`, ...
    pub name: String,

    #[serde(default)]
    pub pretrained: bool,

    /// Square image edge; attention backbones need a multiple of 16
    #[serde(default = "default_image_size")]
    pub image_size: usize,

    #[serde(default = "default_mlp_hidden")]
    pub mlp_hidden: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Inferred from the CSV when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,

    /// `CEL`, `MSE`, `RMSE`, `MAE`, `NLL`; task default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criterion: Option<String>,

    #[serde(default)]
    pub censoring: CensoringRule,
}

/// Optimizer specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimSpec {
    /// `sgd`, `adadelta`, `rmsprop`, `adam`, `adamw`, `radam`
    pub name: String,

    pub lr: f32,

    /// Optimizer-specific parameters (momentum, beta1, beta2, eps, weight_decay, alpha)
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_clip: Option<f32>,

    #[serde(default)]
    pub save_weight_policy: CheckpointPolicy,

    #[serde(default)]
    pub tie_break: TieBreak,

    #[serde(default)]
    pub checkpoint_format: CheckpointFormat,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// `cpu`, `-1`, or accelerator ids such as `0-1`
    #[serde(default = "default_device")]
    pub device: String,

    /// Debug-log every n-th batch; 0 disables
    #[serde(default)]
    pub log_interval: usize,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            grad_clip: None,
            save_weight_policy: CheckpointPolicy::default(),
            tie_break: TieBreak::default(),
            checkpoint_format: CheckpointFormat::default(),
            output_dir: default_output_dir(),
            device: default_device(),
            log_interval: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationParams {
    /// `-`-separated split names
    #[serde(default = "default_test_splits")]
    pub test_splits: String,

    #[serde(default = "default_batch_size")]
    pub test_batch_size: usize,
}

impl Default for EvaluationParams {
    fn default() -> Self {
        Self {
            test_splits: default_test_splits(),
            test_batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    64
}

fn default_in_channel() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_image_size() -> usize {
    DEFAULT_IMAGE_SIZE
}

fn default_mlp_hidden() -> Vec<usize> {
    vec![64, 64]
}

fn default_epochs() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_test_splits() -> String {
    "train-val-test".to_string()
}
