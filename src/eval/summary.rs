//! Evaluate every checkpoint of a run and persist the results

use super::engine::{EvalOptions, Evaluator, RecordFailure, SplitEvaluation};
use super::summary_log::SummaryRows;
use crate::data::ImageLoader;
use crate::io::load_checkpoint;
use crate::schema::{Dataset, RawTable};
use crate::train::list_checkpoints;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const LIKELIHOOD_DIR: &str = "likelihood";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// File stem, e.g. `weight_best`
    pub weight: String,
    pub epoch: usize,
    pub val_loss: f32,
    pub likelihood: PathBuf,
    pub splits: Vec<SplitEvaluation>,
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub weight_dir: PathBuf,
    pub checkpoints: Vec<CheckpointSummary>,
}

impl EvaluationSummary {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Evaluation summary: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Name of the run a weights directory belongs to
fn run_name(weight_dir: &Path) -> String {
    weight_dir
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string())
}

/// Evaluate each checkpoint in `weight_dir` against `table`
///
/// Records are typed with the task description stored in each checkpoint,
/// so class indices match the ones used in training. Likelihood tables go
/// to `<output_dir>/likelihood/`, the summary to `<output_dir>/summary.json`.
/// Each checkpoint also appends its per-group metrics to `summary_log`.
pub fn evaluate_weight_dir(
    weight_dir: &Path,
    table: &RawTable,
    options: &EvalOptions,
    images: Arc<dyn ImageLoader>,
    output_dir: &Path,
    summary_log: &Path,
) -> Result<EvaluationSummary> {
    let likelihood_dir = output_dir.join(LIKELIHOOD_DIR);
    std::fs::create_dir_all(&likelihood_dir)?;
    let datetime = run_name(weight_dir);

    let mut summary = EvaluationSummary {
        weight_dir: weight_dir.to_path_buf(),
        checkpoints: Vec::new(),
    };

    for path in list_checkpoints(weight_dir)? {
        let weight = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(weight = %weight, "evaluating checkpoint");

        let checkpoint = load_checkpoint(&path)?;
        let (epoch, val_loss) = (checkpoint.metadata.epoch, checkpoint.metadata.val_loss);
        let dataset = Arc::new(Dataset::from_table(
            table,
            &checkpoint.metadata.architecture.task,
        )?);

        let evaluator = Evaluator::from_checkpoint(checkpoint, options.clone())?;
        let evaluation = evaluator.evaluate(dataset, Arc::clone(&images))?;
        if !evaluation.failures.is_empty() {
            tracing::warn!(
                weight = %weight,
                failures = evaluation.failures.len(),
                "records skipped"
            );
        }

        let likelihood = likelihood_dir.join(format!("likelihood_{weight}.csv"));
        evaluation.likelihood.write_csv(&likelihood)?;
        SummaryRows::new(&datetime, &weight, &evaluation.splits).append(summary_log)?;

        summary.checkpoints.push(CheckpointSummary {
            weight,
            epoch,
            val_loss,
            likelihood,
            splits: evaluation.splits,
            failures: evaluation.failures,
        });
    }

    summary.write_json(output_dir.join(SUMMARY_FILE))?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FileImageLoader;
    use crate::eval::summary_log_path;
    use crate::io::{save_checkpoint, Checkpoint, CheckpointFormat, CheckpointMetadata, SaveConfig};
    use crate::network::{compose, ModelOptions};
    use crate::schema::{infer_task, InferenceOptions, Split};

    fn table() -> RawTable {
        let mut rows: Vec<[String; 5]> = Vec::new();
        for (i, group) in ["A", "B"].iter().enumerate() {
            for j in 0..4 {
                rows.push([
                    format!("{group}{j}"),
                    group.to_string(),
                    format!("{}", (i * 4 + j) as f32 / 8.0),
                    (j % 2).to_string(),
                    "test".to_string(),
                ]);
            }
        }
        let rows: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect();
        let slices: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
        RawTable::from_rows(&["uniqID", "group", "input_x", "label_y", "split"], &slices).unwrap()
    }

    /// `<root>/<run>/weights/weight_best.json`
    fn saved_run(root: &Path, table: &RawTable) -> PathBuf {
        let task = infer_task(table, &InferenceOptions::default()).unwrap();
        let model = compose(&task, &ModelOptions::new("MLP")).unwrap();
        let checkpoint = Checkpoint::from_model(
            &model,
            CheckpointMetadata::new(model.spec().clone(), "CEL").at_epoch(1, 0.7, 0.6),
        );
        let weight_dir = root.join("2026-03-04-05-06-07").join("weights");
        std::fs::create_dir_all(&weight_dir).unwrap();
        save_checkpoint(
            &checkpoint,
            weight_dir.join("weight_best.json"),
            &SaveConfig::new(CheckpointFormat::Json),
        )
        .unwrap();
        weight_dir
    }

    #[test]
    fn test_repeated_runs_accumulate_in_summary_log() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let weight_dir = saved_run(dir.path(), &table);
        let run_dir = weight_dir.parent().unwrap().to_path_buf();
        let log = summary_log_path(dir.path());
        let options = EvalOptions {
            splits: vec![Split::Test],
            ..EvalOptions::default()
        };

        let evaluate = || {
            evaluate_weight_dir(
                &weight_dir,
                &table,
                &options,
                Arc::new(FileImageLoader),
                &run_dir,
                &log,
            )
            .unwrap()
        };

        let summary = evaluate();
        let groups: Vec<Option<&str>> = summary.checkpoints[0]
            .splits
            .iter()
            .map(|s| s.group.as_deref())
            .collect();
        assert_eq!(groups, vec![Some("A"), Some("B")]);

        let first = std::fs::read_to_string(&log).unwrap();
        assert_eq!(first.lines().count(), 3);
        assert_eq!(
            first.lines().next(),
            Some("datetime,weight,group,label_y_test_auc")
        );
        assert!(first
            .lines()
            .nth(1)
            .is_some_and(|row| row.starts_with("2026-03-04-05-06-07,weight_best,A,")));

        evaluate();
        let second = std::fs::read_to_string(&log).unwrap();
        assert_eq!(second.lines().count(), 5);
        assert_eq!(second.matches("datetime").count(), 1);
        assert!(run_dir.join(SUMMARY_FILE).exists());
    }
}
