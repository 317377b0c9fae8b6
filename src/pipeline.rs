//! End-to-end train and test runs
//!
//! Train: CSV -> task description -> composed model -> training loop ->
//! run directory. Test: run directory -> every checkpoint -> likelihood
//! tables and a summary.

use crate::config::{build_optimizer, parse_splits, TrainSpec};
use crate::data::{DataLoader, FileImageLoader, ImageLoader, LoaderConfig};
use crate::device::select_device;
use crate::eval::{evaluate_weight_dir, summary_log_path, EvalOptions, EvaluationSummary};
use crate::network::{compose, ArchitectureSpec, ComposedModel, ModelOptions};
use crate::schema::{infer_task, Dataset, InferenceOptions, RawTable, Split, TaskDescription};
use crate::task::{Criterion, TaskStrategy};
use crate::train::{
    latest_weights_dir, ProgressCallback, RunDirectory, TrainResult, Trainer, TrainerConfig,
};
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Contents of `parameters.json`
#[derive(Debug, Serialize)]
struct RunParameters<'a> {
    config: &'a TrainSpec,
    criterion: Criterion,
    architecture: &'a ArchitectureSpec,
    num_parameters: usize,
}

/// What a finished training run left behind
pub struct TrainingOutcome {
    pub run_dir: PathBuf,
    pub result: TrainResult,
    pub model: ComposedModel,
}

/// Inference options derived from a run specification
pub fn inference_options(spec: &TrainSpec) -> InferenceOptions {
    InferenceOptions {
        task: spec.task.kind,
        in_channel: spec.data.in_channel,
        pretrained: spec.model.pretrained,
    }
}

/// Read the CSV and infer the task it describes
pub fn describe(csvpath: &Path, options: &InferenceOptions) -> Result<TaskDescription> {
    let table = RawTable::from_path(csvpath)?;
    infer_task(&table, options)
}

/// Train a model as described by `spec`
///
/// Everything that can fail before the first batch (schema, architecture,
/// criterion, optimizer, device) is checked before the run directory is
/// created.
pub fn run_training(spec: &TrainSpec) -> Result<TrainingOutcome> {
    run_training_with(spec, Arc::new(FileImageLoader))
}

/// [`run_training`] with a custom image source
pub fn run_training_with(spec: &TrainSpec, images: Arc<dyn ImageLoader>) -> Result<TrainingOutcome> {
    let device = select_device(&spec.training.device)?;

    let table = RawTable::from_path(&spec.data.csvpath)?;
    let task = infer_task(&table, &inference_options(spec))?;
    let dataset = Arc::new(Dataset::from_table(&table, &task)?);
    dataset.require_splits(&[Split::Train, Split::Val])?;
    tracing::info!(
        task = %task.kind,
        heads = task.labels.len(),
        records = dataset.len(),
        "schema inferred"
    );

    let model = compose(
        &task,
        &ModelOptions {
            model: spec.model.name.clone(),
            image_size: spec.model.image_size,
            mlp_hidden: spec.model.mlp_hidden.clone(),
            seed: spec.data.seed,
        },
    )?;
    let criterion = spec
        .task
        .criterion
        .as_deref()
        .map(str::parse::<Criterion>)
        .transpose()
        .map_err(Error::ConfigError)?;
    let strategy = TaskStrategy::new(task.kind, criterion)?;
    let optimizer = build_optimizer(&spec.optimizer)?;
    tracing::info!(
        model = %model.spec().model,
        criterion = %strategy.criterion(),
        optimizer = optimizer.name(),
        parameters = model.num_parameters(),
        device = %device,
        "model composed"
    );

    let base = LoaderConfig {
        batch_size: spec.data.batch_size,
        image_size: spec.model.image_size,
        channels: spec.data.in_channel,
        normalize_image: spec.data.normalize_image,
        seed: spec.data.seed,
        load_tabular: model.uses_tabular(),
        load_images: model.uses_images(),
        // a Cox partial likelihood needs at least two records
        min_batch: if task.is_survival() { 2 } else { 1 },
        ..LoaderConfig::default()
    };
    let train_loader = DataLoader::new(
        Arc::clone(&dataset),
        dataset.split_indices(Split::Train),
        LoaderConfig {
            shuffle: true,
            sampler: spec.data.sampler,
            augmentation: spec.data.augmentation,
            ..base.clone()
        },
        Arc::clone(&images),
    );
    let val_loader = DataLoader::new(
        Arc::clone(&dataset),
        dataset.split_indices(Split::Val),
        base,
        images,
    );

    let mut run_dir = RunDirectory::create(
        &spec.training.output_dir,
        spec.training.checkpoint_format,
    )?;
    run_dir.write_parameters(&RunParameters {
        config: spec,
        criterion: strategy.criterion(),
        architecture: model.spec(),
        num_parameters: model.num_parameters(),
    })?;

    let mut trainer = Trainer::new(
        model,
        strategy,
        optimizer,
        TrainerConfig {
            epochs: spec.training.epochs,
            policy: spec.training.save_weight_policy,
            tie_break: spec.training.tie_break,
            max_grad_norm: spec.training.grad_clip,
            log_interval: spec.training.log_interval,
        },
    );
    trainer.annotate(
        "normalize_image",
        serde_json::Value::Bool(spec.data.normalize_image),
    );
    trainer.annotate(
        "censoring",
        serde_json::to_value(spec.task.censoring)
            .map_err(|e| Error::Serialization(e.to_string()))?,
    );
    trainer.add_callback(ProgressCallback::new(spec.training.log_interval));

    let result = trainer.train(&train_loader, &val_loader, &mut run_dir)?;
    tracing::info!(
        run = %run_dir.root().display(),
        best_epoch = ?result.best_epoch,
        elapsed_secs = result.elapsed_secs,
        "training finished"
    );

    Ok(TrainingOutcome {
        run_dir: run_dir.root().to_path_buf(),
        result,
        model: trainer.into_model(),
    })
}

/// How a test run is invoked
#[derive(Debug, Clone, PartialEq)]
pub struct TestRequest {
    pub csvpath: PathBuf,
    /// Latest run under `output_dir` when absent
    pub weight_dir: Option<PathBuf>,
    pub test_splits: String,
    pub test_batch_size: usize,
    pub output_dir: PathBuf,
}

/// Evaluate every checkpoint of a run
///
/// Reports are written next to the weights directory, in the run directory.
/// Metrics are also appended to `<output_dir>/summary/summary.csv`.
pub fn run_test(request: &TestRequest) -> Result<EvaluationSummary> {
    run_test_with(request, Arc::new(FileImageLoader))
}

/// [`run_test`] with a custom image source
pub fn run_test_with(
    request: &TestRequest,
    images: Arc<dyn ImageLoader>,
) -> Result<EvaluationSummary> {
    let splits = parse_splits(&request.test_splits).map_err(|e| Error::ConfigError(e.to_string()))?;
    if request.test_batch_size == 0 {
        return Err(Error::ConfigError(
            "test_batch_size must be greater than 0".to_string(),
        ));
    }
    let weight_dir = match &request.weight_dir {
        Some(dir) => dir.clone(),
        None => latest_weights_dir(&request.output_dir)?,
    };
    let report_dir = weight_dir
        .parent()
        .map_or_else(|| weight_dir.clone(), Path::to_path_buf);
    tracing::info!(weights = %weight_dir.display(), "testing");

    let table = RawTable::from_path(&request.csvpath)?;
    let options = EvalOptions {
        splits,
        batch_size: request.test_batch_size,
        ..EvalOptions::default()
    };
    evaluate_weight_dir(
        &weight_dir,
        &table,
        &options,
        images,
        &report_dir,
        &summary_log_path(&request.output_dir),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_options_follow_spec() {
        let spec: TrainSpec = serde_yaml::from_str(
            r#"
data:
  csvpath: trials.csv
  in_channel: 3
model:
  name: ResNet18
  pretrained: true
task:
  kind: regression
optimizer:
  name: adam
  lr: 0.001
"#,
        )
        .unwrap();
        let options = inference_options(&spec);
        assert_eq!(options.task, Some(crate::schema::TaskKind::Regression));
        assert_eq!(options.in_channel, 3);
        assert!(options.pretrained);
    }

    #[test]
    fn test_bad_test_request_fails_before_io() {
        let request = TestRequest {
            csvpath: PathBuf::from("/nonexistent.csv"),
            weight_dir: None,
            test_splits: "train-holdout".into(),
            test_batch_size: 64,
            output_dir: PathBuf::from("/nonexistent"),
        };
        assert!(matches!(run_test(&request), Err(Error::ConfigError(_))));
    }
}
