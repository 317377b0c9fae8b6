//! Per-epoch loss bookkeeping

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Running size-weighted loss over one split of one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct LossAccumulator {
    per_head: Vec<f64>,
    total: f64,
    records: usize,
}

impl LossAccumulator {
    pub fn new(heads: usize) -> Self {
        Self {
            per_head: vec![0.0; heads],
            total: 0.0,
            records: 0,
        }
    }

    /// Add a batch mean loss, weighted by the batch size
    pub fn add(&mut self, per_head: &[f32], batch_size: usize) {
        let weight = batch_size as f64;
        for (acc, &loss) in self.per_head.iter_mut().zip(per_head) {
            *acc += f64::from(loss) * weight;
        }
        self.total += per_head.iter().map(|&l| f64::from(l)).sum::<f64>() * weight;
        self.records += batch_size;
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Σ batch_loss·batch_size / N, per head and total
    pub fn finish(&self) -> SplitLoss {
        let n = self.records.max(1) as f64;
        SplitLoss {
            total: (self.total / n) as f32,
            per_head: self.per_head.iter().map(|l| (l / n) as f32).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitLoss {
    pub total: f32,
    pub per_head: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    /// 1-based
    pub epoch: usize,
    pub train: SplitLoss,
    pub val: SplitLoss,
}

/// Learning curve of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub labels: Vec<String>,
    pub epochs: Vec<EpochLosses>,
}

impl LossHistory {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            epochs: Vec::new(),
        }
    }

    pub fn push(&mut self, epoch: EpochLosses) {
        self.epochs.push(epoch);
    }

    pub fn last(&self) -> Option<&EpochLosses> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// `epoch, train_loss, val_loss, train_<label>, val_<label>, ...`
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec![
            "epoch".to_string(),
            "train_loss".to_string(),
            "val_loss".to_string(),
        ];
        for label in &self.labels {
            header.push(format!("train_{label}"));
            header.push(format!("val_{label}"));
        }
        writer.write_record(&header)?;

        for row in &self.epochs {
            let mut record = vec![
                row.epoch.to_string(),
                row.train.total.to_string(),
                row.val.total.to_string(),
            ];
            for (train, val) in row.train.per_head.iter().zip(&row.val.per_head) {
                record.push(train.to_string());
                record.push(val.to_string());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
