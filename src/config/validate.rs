//! Configuration validation
//!
//! Everything that can be checked without reading the CSV is checked here,
//! before any data is touched.

use super::schema::TrainSpec;
use crate::network::ModelSelection;
use crate::schema::Split;
use crate::task::{Criterion, TaskStrategy};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("CSV file does not exist: {0}")]
    CsvNotFound(String),

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid batch size: {0} (must be > 0)")]
    InvalidBatchSize(usize),

    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("Invalid optimizer: {0} (must be one of: sgd, adadelta, rmsprop, adam, adamw, radam)")]
    InvalidOptimizer(String),

    #[error("Invalid gradient clip value: {0} (must be > 0.0)")]
    InvalidGradClip(f32),

    #[error("Invalid in_channel: {0} (must be 1 or 3)")]
    InvalidChannels(usize),

    #[error("Invalid image size: {0} (must be > 0)")]
    InvalidImageSize(usize),

    #[error("Invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("{0}")]
    InvalidCriterion(String),

    #[error("Criterion '{criterion}' does not apply to task '{task}'")]
    CriterionMismatch { criterion: String, task: String },

    #[error("{0}")]
    InvalidSplits(String),
}

pub const OPTIMIZERS: [&str; 6] = ["sgd", "adadelta", "rmsprop", "adam", "adamw", "radam"];

/// Parse `train-val-test` style split lists
pub fn parse_splits(value: &str) -> Result<Vec<Split>, ValidationError> {
    let splits = value
        .split('-')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Split>, String>>()
        .map_err(ValidationError::InvalidSplits)?;
    if splits.is_empty() {
        return Err(ValidationError::InvalidSplits(format!(
            "No splits in '{value}'"
        )));
    }
    Ok(splits)
}

/// Validate a training specification
pub fn validate_config(spec: &TrainSpec) -> Result<(), ValidationError> {
    #[cfg(not(test))]
    if !spec.data.csvpath.exists() {
        return Err(ValidationError::CsvNotFound(
            spec.data.csvpath.display().to_string(),
        ));
    }

    if spec.data.batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(spec.data.batch_size));
    }
    if spec.evaluation.test_batch_size == 0 {
        return Err(ValidationError::InvalidBatchSize(
            spec.evaluation.test_batch_size,
        ));
    }
    if !matches!(spec.data.in_channel, 1 | 3) {
        return Err(ValidationError::InvalidChannels(spec.data.in_channel));
    }

    spec.model
        .name
        .parse::<ModelSelection>()
        .map_err(|e| ValidationError::InvalidModel {
            model: spec.model.name.clone(),
            reason: e.to_string(),
        })?;
    if spec.model.image_size == 0 {
        return Err(ValidationError::InvalidImageSize(spec.model.image_size));
    }

    if !(spec.optimizer.lr > 0.0) {
        return Err(ValidationError::InvalidLearningRate(spec.optimizer.lr));
    }
    if !OPTIMIZERS.contains(&spec.optimizer.name.to_lowercase().as_str()) {
        return Err(ValidationError::InvalidOptimizer(
            spec.optimizer.name.clone(),
        ));
    }

    if let Some(name) = &spec.task.criterion {
        let criterion: Criterion = name.parse().map_err(ValidationError::InvalidCriterion)?;
        if let Some(kind) = spec.task.kind {
            if TaskStrategy::new(kind, Some(criterion)).is_err() {
                return Err(ValidationError::CriterionMismatch {
                    criterion: name.clone(),
                    task: kind.to_string(),
                });
            }
        }
    }

    if spec.training.epochs == 0 {
        return Err(ValidationError::InvalidEpochs(spec.training.epochs));
    }
    if let Some(grad_clip) = spec.training.grad_clip {
        if !(grad_clip > 0.0) {
            return Err(ValidationError::InvalidGradClip(grad_clip));
        }
    }

    parse_splits(&spec.evaluation.test_splits)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;
    use crate::schema::TaskKind;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn valid_spec() -> TrainSpec {
        TrainSpec {
            data: DataConfig {
                csvpath: PathBuf::from("trials.csv"),
                batch_size: 8,
                sampler: Default::default(),
                augmentation: Default::default(),
                normalize_image: true,
                in_channel: 1,
                seed: 42,
            },
            model: ModelSpec {
                name: "MLP+ResNet18".into(),
                pretrained: false,
                image_size: 64,
                mlp_hidden: vec![32],
            },
            task: TaskSpec::default(),
            optimizer: OptimSpec {
                name: "Adam".into(),
                lr: 1e-3,
                params: HashMap::new(),
            },
            training: TrainingParams::default(),
            evaluation: EvaluationParams::default(),
        }
    }

    #[test]
    fn test_valid_spec_passes() {
        assert!(validate_config(&valid_spec()).is_ok());
    }

    #[test]
    fn test_rejections() {
        let mut spec = valid_spec();
        spec.data.batch_size = 0;
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidBatchSize(0))
        ));

        let mut spec = valid_spec();
        spec.optimizer.lr = f32::NAN;
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidLearningRate(_))
        ));

        let mut spec = valid_spec();
        spec.optimizer.name = "lbfgs".into();
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidOptimizer(_))
        ));

        let mut spec = valid_spec();
        spec.data.in_channel = 2;
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidChannels(2))
        ));

        let mut spec = valid_spec();
        spec.model.name = "MLP+ResNet18+DenseNet".into();
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidModel { .. })
        ));

        let mut spec = valid_spec();
        spec.evaluation.test_splits = "train-holdout".into();
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidSplits(_))
        ));
    }

    #[test]
    fn test_every_listed_optimizer_is_accepted() {
        for name in ["SGD", "Adadelta", "RMSprop", "Adam", "RAdam"] {
            let mut spec = valid_spec();
            spec.optimizer.name = name.into();
            assert!(validate_config(&spec).is_ok(), "{name} rejected");
        }
    }

    #[test]
    fn test_criterion_must_fit_task() {
        let mut spec = valid_spec();
        spec.task.kind = Some(TaskKind::Regression);
        spec.task.criterion = Some("RMSE".into());
        assert!(validate_config(&spec).is_ok());

        spec.task.criterion = Some("CEL".into());
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::CriterionMismatch { .. })
        ));

        spec.task.criterion = Some("hinge".into());
        assert!(matches!(
            validate_config(&spec),
            Err(ValidationError::InvalidCriterion(_))
        ));
    }

    #[test]
    fn test_parse_splits() {
        assert_eq!(
            parse_splits("train-val-test").unwrap(),
            vec![Split::Train, Split::Val, Split::Test]
        );
        assert_eq!(parse_splits("test").unwrap(), vec![Split::Test]);
        assert!(parse_splits("").is_err());
    }
}
