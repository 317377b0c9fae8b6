//! Per-record prediction table
//!
//! Columns: `<id>, split, group`, one truth column per label, then
//! `pred_<label>_<class>` probabilities (classification) or `pred_<label>`
//! (regression value, survival risk), and `periods` for survival.

use crate::data::Batch;
use crate::schema::{LabelKind, TaskDescription, TaskKind};
use crate::task::{HeadPrediction, HeadTargets};
use crate::Result;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl LikelihoodTable {
    pub fn new(task: &TaskDescription) -> Self {
        let mut header = vec![
            task.id_column.clone(),
            "split".to_string(),
            "group".to_string(),
        ];
        header.extend(task.labels.iter().map(|l| l.name.clone()));
        for label in &task.labels {
            match &label.kind {
                LabelKind::Categorical { classes } => header.extend(
                    classes
                        .iter()
                        .map(|class| format!("pred_{}_{class}", label.name)),
                ),
                _ => header.push(format!("pred_{}", label.name)),
            }
        }
        if task.kind == TaskKind::Survival {
            header.push("periods".to_string());
        }
        Self {
            header,
            rows: Vec::new(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row per batch record
    pub fn push_batch(
        &mut self,
        task: &TaskDescription,
        batch: &Batch,
        predictions: &[HeadPrediction],
    ) {
        for r in 0..batch.len() {
            let mut row = vec![
                batch.ids[r].clone(),
                batch.splits[r].to_string(),
                batch.groups[r].clone().unwrap_or_default(),
            ];
            for (label, targets) in task.labels.iter().zip(&batch.targets) {
                row.push(match targets {
                    HeadTargets::Classes(c) => label
                        .classes()
                        .and_then(|classes| classes.get(c[r]))
                        .cloned()
                        .unwrap_or_else(|| c[r].to_string()),
                    HeadTargets::Values(v) => v[r].to_string(),
                    HeadTargets::Survival { events, .. } => u8::from(events[r]).to_string(),
                });
            }
            for prediction in predictions {
                row.extend(prediction.row(r).iter().map(f32::to_string));
            }
            if let Some(periods) = batch.periods() {
                row.push(periods[r].to_string());
            }
            self.rows.push(row);
        }
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
