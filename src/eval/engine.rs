//! Forward-only evaluation of a frozen model

use super::likelihood::LikelihoodTable;
use crate::data::{DataLoader, ImageLoader, LoaderConfig};
use crate::error::{ResourceError, TaskStrategyError};
use crate::io::Checkpoint;
use crate::network::ComposedModel;
use crate::schema::{Dataset, Split};
use crate::task::{CensoringRule, Criterion, HeadPrediction, HeadReport, HeadTargets, TaskStrategy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a checkpoint is evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    pub splits: Vec<Split>,
    pub batch_size: usize,
    pub censoring: CensoringRule,
    pub normalize_image: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            splits: Split::ALL.to_vec(),
            batch_size: 64,
            censoring: CensoringRule::default(),
            normalize_image: true,
        }
    }
}

/// A record left out of evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub record: String,
    pub reason: String,
}

impl From<&ResourceError> for RecordFailure {
    fn from(err: &ResourceError) -> Self {
        Self {
            record: err.record().unwrap_or_default().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Metrics of one group within one split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitEvaluation {
    pub split: Split,
    /// `None` for records without a group value
    pub group: Option<String>,
    pub records: usize,
    pub reports: Vec<HeadReport>,
}

/// Everything one pass over a checkpoint produced
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub splits: Vec<SplitEvaluation>,
    pub failures: Vec<RecordFailure>,
    pub likelihood: LikelihoodTable,
}

/// Holds a loaded model; evaluation never updates its weights
pub struct Evaluator {
    model: ComposedModel,
    strategy: TaskStrategy,
    options: EvalOptions,
}

impl Evaluator {
    pub fn new(model: ComposedModel, strategy: TaskStrategy, options: EvalOptions) -> Self {
        Self {
            model,
            strategy,
            options,
        }
    }

    /// Rebuild model and strategy from what the checkpoint recorded
    ///
    /// `normalize_image` and `censoring` annotations stored at training time
    /// take precedence over `options`.
    pub fn from_checkpoint(checkpoint: Checkpoint, mut options: EvalOptions) -> Result<Self> {
        let criterion: Criterion = checkpoint
            .metadata
            .criterion
            .parse()
            .map_err(Error::ConfigError)?;
        if let Some(normalize) = checkpoint
            .metadata
            .custom
            .get("normalize_image")
            .and_then(serde_json::Value::as_bool)
        {
            options.normalize_image = normalize;
        }
        if let Some(censoring) = checkpoint
            .metadata
            .custom
            .get("censoring")
            .and_then(|v| serde_json::from_value::<CensoringRule>(v.clone()).ok())
        {
            options.censoring = censoring;
        }
        let model = checkpoint.into_model()?;
        let strategy = TaskStrategy::new(model.task().kind, Some(criterion))?;
        Ok(Self::new(model, strategy, options))
    }

    pub fn model(&self) -> &ComposedModel {
        &self.model
    }

    fn loader_config(&self) -> LoaderConfig {
        let spec = self.model.spec();
        LoaderConfig {
            batch_size: self.options.batch_size,
            image_size: spec.image_size,
            channels: spec
                .task
                .modality
                .image
                .as_ref()
                .map_or(1, |image| image.channels),
            normalize_image: self.options.normalize_image,
            load_tabular: self.model.uses_tabular(),
            load_images: self.model.uses_images(),
            skip_failed_images: true,
            ..LoaderConfig::default()
        }
    }

    /// Predict every record of the requested splits and score each head
    ///
    /// Each split is scored once per group value; a group whose records
    /// cannot be scored (a single class) is logged and left out. Splits
    /// without records are skipped. Records whose image cannot be loaded are reported in
    /// [`Evaluation::failures`] and left out.
    pub fn evaluate(
        &self,
        dataset: Arc<Dataset>,
        images: Arc<dyn ImageLoader>,
    ) -> Result<Evaluation> {
        let task = self.model.task();
        let mut likelihood = LikelihoodTable::new(task);
        let mut failures = Vec::new();
        let mut splits = Vec::new();

        for &split in &self.options.splits {
            let groups = group_indices(&dataset, split);
            if groups.is_empty() {
                tracing::warn!(split = %split, "no records, skipping split");
                continue;
            }

            for (group, indices) in groups {
                let loader = DataLoader::new(
                    Arc::clone(&dataset),
                    indices,
                    self.loader_config(),
                    Arc::clone(&images),
                );

                let mut predictions: Vec<HeadPrediction> = task
                    .labels
                    .iter()
                    .map(|l| HeadPrediction::empty(l.output_width()))
                    .collect();
                let mut targets: Vec<HeadTargets> =
                    task.labels.iter().map(HeadTargets::empty_for).collect();

                for batch in loader.epoch(0) {
                    let batch = batch?;
                    failures.extend(batch.failures.iter().map(RecordFailure::from));
                    if batch.is_empty() {
                        continue;
                    }
                    let outputs = self.model.forward(&batch.input())?;
                    let batch_predictions = self.strategy.predict(task, &outputs);
                    likelihood.push_batch(task, &batch, &batch_predictions);
                    for (acc, p) in predictions.iter_mut().zip(&batch_predictions) {
                        acc.extend(p);
                    }
                    for (acc, t) in targets.iter_mut().zip(&batch.targets) {
                        acc.extend(t)?;
                    }
                }

                let records = targets.first().map_or(0, HeadTargets::len);
                if records == 0 {
                    tracing::warn!(split = %split, group = ?group, "every record failed, skipping");
                    continue;
                }
                let reports = match self.strategy.metrics(
                    task,
                    &predictions,
                    &targets,
                    self.options.censoring,
                ) {
                    Ok(reports) => reports,
                    // a small group may hold a single class; the split as a whole still fails
                    Err(Error::TaskStrategy(
                        err @ (TaskStrategyError::SingleClass { .. }
                        | TaskStrategyError::EmptyEvaluation { .. }),
                    )) if group.is_some() => {
                        tracing::warn!(split = %split, group = ?group, error = %err, "group not scored");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                tracing::info!(split = %split, group = ?group, records, "evaluated");
                splits.push(SplitEvaluation {
                    split,
                    group,
                    records,
                    reports,
                });
            }
        }

        Ok(Evaluation {
            splits,
            failures,
            likelihood,
        })
    }
}

/// Record indices of `split`, keyed by group in sorted order
fn group_indices(dataset: &Dataset, split: Split) -> BTreeMap<Option<String>, Vec<usize>> {
    let mut groups: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
    for i in dataset.split_indices(split) {
        groups
            .entry(dataset.records()[i].group.clone())
            .or_default()
            .push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{compose, ModelOptions};
    use crate::schema::{infer_task, InferenceOptions, RawTable};
    use crate::task::MetricReport;
    use std::path::Path;

    /// Constant image; fails for paths containing "broken"
    struct Flat;

    impl ImageLoader for Flat {
        fn load(
            &self,
            record: &str,
            path: &Path,
            channels: usize,
            size: usize,
        ) -> std::result::Result<Vec<f32>, ResourceError> {
            if path.to_string_lossy().contains("broken") {
                return Err(ResourceError::ImageDecode {
                    record: record.to_string(),
                    path: path.to_path_buf(),
                    reason: "truncated".into(),
                });
            }
            Ok(vec![0.5; channels * size * size])
        }
    }

    fn dataset(rows: &[[&str; 5]]) -> Arc<Dataset> {
        let slices: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        let table = RawTable::from_rows(
            &["uniqID", "input_x", "imgpath", "label_y", "split"],
            &slices,
        )
        .unwrap();
        let task = infer_task(&table, &InferenceOptions::default()).unwrap();
        Arc::new(Dataset::from_table(&table, &task).unwrap())
    }

    #[test]
    fn test_one_report_per_head_and_split() {
        let data = dataset(&[
            ["a", "0.1", "a.pgm", "0", "val"],
            ["b", "0.9", "b.pgm", "1", "val"],
            ["c", "0.2", "c.pgm", "0", "test"],
            ["d", "0.8", "d.pgm", "1", "test"],
            ["e", "0.7", "e.pgm", "1", "test"],
        ]);
        let model = compose(data.task(), &ModelOptions::new("MLP")).unwrap();
        let strategy = TaskStrategy::new(data.task().kind, None).unwrap();
        let evaluator = Evaluator::new(model, strategy, EvalOptions::default());

        let result = evaluator.evaluate(data, Arc::new(Flat)).unwrap();
        // no train records
        assert_eq!(
            result.splits.iter().map(|s| s.split).collect::<Vec<_>>(),
            vec![Split::Val, Split::Test]
        );
        assert_eq!(result.splits[1].records, 3);
        assert_eq!(result.splits[0].reports.len(), 1);
        assert!(matches!(
            result.splits[0].reports[0].report,
            MetricReport::Roc(_)
        ));
        assert_eq!(result.likelihood.len(), 5);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_each_group_is_scored_separately() {
        // site A: label rises with x, site B: label falls with x, site C: one class
        let table = RawTable::from_rows(
            &["uniqID", "group", "input_x", "label_y", "split"],
            &[
                &["a1", "A", "0.1", "0", "test"],
                &["a2", "A", "0.4", "0", "test"],
                &["a3", "A", "0.6", "1", "test"],
                &["a4", "A", "0.9", "1", "test"],
                &["b1", "B", "0.2", "1", "test"],
                &["b2", "B", "0.3", "1", "test"],
                &["b3", "B", "0.7", "0", "test"],
                &["b4", "B", "0.8", "0", "test"],
                &["c1", "C", "0.5", "0", "test"],
                &["c2", "C", "0.6", "0", "test"],
            ],
        )
        .unwrap();
        let task = infer_task(&table, &InferenceOptions::default()).unwrap();
        let data = Arc::new(Dataset::from_table(&table, &task).unwrap());
        // no hidden layer: the score is monotonic in x
        let options = ModelOptions {
            mlp_hidden: Vec::new(),
            ..ModelOptions::new("MLP")
        };
        let model = compose(data.task(), &options).unwrap();
        let strategy = TaskStrategy::new(data.task().kind, None).unwrap();
        let evaluator = Evaluator::new(model, strategy, EvalOptions::default());

        let result = evaluator.evaluate(data, Arc::new(Flat)).unwrap();
        let groups: Vec<Option<&str>> = result.splits.iter().map(|s| s.group.as_deref()).collect();
        // C cannot be scored and is left out
        assert_eq!(groups, vec![Some("A"), Some("B")]);
        assert!(result.splits.iter().all(|s| s.split == Split::Test && s.records == 4));

        let aucs: Vec<f32> = result
            .splits
            .iter()
            .map(|s| match &s.reports[0].report {
                MetricReport::Roc(roc) => roc.auc,
                other => panic!("expected ROC, got {other:?}"),
            })
            .collect();
        assert!((aucs[0] - aucs[1]).abs() > 0.99);
        assert!((aucs[0] + aucs[1] - 1.0).abs() < 1e-6);
        assert_eq!(result.likelihood.len(), 10);
    }

    #[test]
    fn test_broken_image_is_a_record_failure() {
        let data = dataset(&[
            ["a", "0.1", "a.pgm", "0", "test"],
            ["b", "0.9", "broken.pgm", "1", "test"],
            ["c", "0.2", "c.pgm", "0", "test"],
            ["d", "0.8", "d.pgm", "1", "test"],
        ]);
        let options = ModelOptions {
            image_size: 16,
            ..ModelOptions::new("MLP+ResNet18")
        };
        let model = compose(data.task(), &options).unwrap();
        let strategy = TaskStrategy::new(data.task().kind, None).unwrap();
        let evaluator = Evaluator::new(
            model,
            strategy,
            EvalOptions {
                splits: vec![Split::Test],
                ..EvalOptions::default()
            },
        );

        let result = evaluator.evaluate(data, Arc::new(Flat)).unwrap();
        assert_eq!(
            result.failures,
            vec![RecordFailure {
                record: "b".into(),
                reason: ResourceError::ImageDecode {
                    record: "b".into(),
                    path: "broken.pgm".into(),
                    reason: "truncated".into(),
                }
                .to_string(),
            }]
        );
        assert_eq!(result.splits[0].records, 3);
        assert_eq!(result.likelihood.len(), 3);
    }
}
