//! CLI argument parsing
//!
//! ```bash
//! nervus train --config run.yaml
//! nervus train --csvpath trials.csv --model MLP+ResNet18 --task classification --epochs 50
//! nervus test --csvpath trials.csv --weight-dir results/2024-01-01-10-00-00/weights
//! nervus validate run.yaml
//! nervus info --csvpath trials.csv
//! ```

use super::schema::{DataConfig, ModelSpec, OptimSpec, TrainSpec};
use crate::data::{Augmentation, Sampler};
use crate::io::CheckpointFormat;
use crate::schema::TaskKind;
use crate::train::CheckpointPolicy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nervus: schema-driven multi-task training for tabular and image data
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "nervus")]
#[command(version)]
#[command(about = "Train and evaluate classification, regression and DeepSurv models from a CSV schema")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Train a model
    Train(TrainArgs),

    /// Evaluate every checkpoint of a run
    Test(TestArgs),

    /// Validate a configuration file without training
    Validate(ValidateArgs),

    /// Print the task inferred from a CSV
    Info(InfoArgs),
}

/// Arguments for the train command
///
/// Every flag overrides the matching value of `--config`. Without a config
/// file, `--csvpath` and `--model` are required.
#[derive(Parser, Debug, Clone, Default, PartialEq)]
pub struct TrainArgs {
    /// YAML run specification
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub csvpath: Option<PathBuf>,

    /// classification, regression or deepsurv; inferred when absent
    #[arg(long)]
    pub task: Option<TaskKind>,

    /// MLP, ResNet18, MLP+ResNet18, ...
    #[arg(short, long)]
    pub model: Option<String>,

    /// CEL, MSE, RMSE, MAE or NLL
    #[arg(long)]
    pub criterion: Option<String>,

    #[arg(long)]
    pub optimizer: Option<String>,

    #[arg(long)]
    pub lr: Option<f32>,

    #[arg(short, long)]
    pub epochs: Option<usize>,

    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// yes (class-balanced) or no (uniform)
    #[arg(long)]
    pub sampler: Option<Sampler>,

    /// no, light (xrayaug) or heavy (trivialaugwide, randaug)
    #[arg(long)]
    pub augmentation: Option<Augmentation>,

    #[arg(long)]
    pub normalize_image: Option<bool>,

    #[arg(long)]
    pub pretrained: Option<bool>,

    /// 1 or 3
    #[arg(long)]
    pub in_channel: Option<usize>,

    #[arg(long)]
    pub image_size: Option<usize>,

    /// best or each
    #[arg(long)]
    pub save_weight_policy: Option<CheckpointPolicy>,

    /// json, yaml or safetensors
    #[arg(long)]
    pub checkpoint_format: Option<CheckpointFormat>,

    /// cpu, -1 or accelerator ids such as 0-1
    #[arg(long, allow_hyphen_values = true)]
    pub device: Option<String>,

    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long)]
    pub seed: Option<u64>,
}

/// Arguments for the test command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct TestArgs {
    #[arg(long)]
    pub csvpath: PathBuf,

    /// Weights directory; defaults to the latest run under --output-dir
    #[arg(long)]
    pub weight_dir: Option<PathBuf>,

    /// `-`-separated splits to evaluate
    #[arg(long, default_value = "train-val-test")]
    pub test_splits: String,

    #[arg(long, default_value_t = 64)]
    pub test_batch_size: usize,

    #[arg(short, long, default_value = "results")]
    pub output_dir: PathBuf,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    #[arg(long)]
    pub csvpath: PathBuf,

    /// Force the task family instead of inferring it
    #[arg(long)]
    pub task: Option<TaskKind>,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Unknown output format: {s}. Valid formats: text, json, yaml"
            )),
        }
    }
}

/// Parse command line arguments
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Spec for a flag-only run, before overrides
///
/// Returns `None` when the flags lack a CSV path or a model.
pub fn spec_from_flags(args: &TrainArgs) -> Option<TrainSpec> {
    let csvpath = args.csvpath.clone()?;
    let model = args.model.clone()?;
    Some(TrainSpec {
        data: DataConfig {
            csvpath,
            batch_size: 64,
            sampler: Sampler::default(),
            augmentation: Augmentation::default(),
            normalize_image: true,
            in_channel: 1,
            seed: 42,
        },
        model: ModelSpec {
            name: model,
            pretrained: false,
            image_size: crate::network::DEFAULT_IMAGE_SIZE,
            mlp_hidden: vec![64, 64],
        },
        task: Default::default(),
        optimizer: OptimSpec {
            name: "adam".to_string(),
            lr: 1e-3,
            params: Default::default(),
        },
        training: Default::default(),
        evaluation: Default::default(),
    })
}

/// Apply command-line overrides to a run specification
pub fn apply_overrides(spec: &mut TrainSpec, args: &TrainArgs) {
    if let Some(csvpath) = &args.csvpath {
        spec.data.csvpath = csvpath.clone();
    }
    if let Some(task) = args.task {
        spec.task.kind = Some(task);
    }
    if let Some(model) = &args.model {
        spec.model.name = model.clone();
    }
    if let Some(criterion) = &args.criterion {
        spec.task.criterion = Some(criterion.clone());
    }
    if let Some(optimizer) = &args.optimizer {
        spec.optimizer.name = optimizer.clone();
    }
    if let Some(lr) = args.lr {
        spec.optimizer.lr = lr;
    }
    if let Some(epochs) = args.epochs {
        spec.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        spec.data.batch_size = batch_size;
    }
    if let Some(sampler) = args.sampler {
        spec.data.sampler = sampler;
    }
    if let Some(augmentation) = args.augmentation {
        spec.data.augmentation = augmentation;
    }
    if let Some(normalize) = args.normalize_image {
        spec.data.normalize_image = normalize;
    }
    if let Some(pretrained) = args.pretrained {
        spec.model.pretrained = pretrained;
    }
    if let Some(in_channel) = args.in_channel {
        spec.data.in_channel = in_channel;
    }
    if let Some(image_size) = args.image_size {
        spec.model.image_size = image_size;
    }
    if let Some(policy) = args.save_weight_policy {
        spec.training.save_weight_policy = policy;
    }
    if let Some(format) = args.checkpoint_format {
        spec.training.checkpoint_format = format;
    }
    if let Some(device) = &args.device {
        spec.training.device = device.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        spec.training.output_dir = output_dir.clone();
    }
    if let Some(seed) = args.seed {
        spec.data.seed = seed;
    }
}
