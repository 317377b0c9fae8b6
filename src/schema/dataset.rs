//! Typed dataset records, validated against a task description

use super::infer::parse_event;
use super::table::{RawTable, GROUP_COLUMN, SPLIT_COLUMN};
use super::types::{LabelKind, TaskDescription};
use crate::error::{Result, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            _ => Err(format!("Unknown split: {s}. Valid splits: train, val, test")),
        }
    }
}

/// Ground truth for one head of one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    /// Index into the label's ordered class list
    Class(usize),
    Value(f32),
    /// Survival event indicator (false = censored)
    Event(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub split: Split,
    pub group: Option<String>,
    pub tabular: Vec<f32>,
    pub image: Option<PathBuf>,
    /// One target per label spec, same order
    pub targets: Vec<Target>,
    pub period: Option<f32>,
}

/// All records of a CSV, typed against one task description
#[derive(Debug, Clone)]
pub struct Dataset {
    task: TaskDescription,
    records: Vec<Record>,
}

impl Dataset {
    /// Type every row; the first offending cell aborts with its record and column
    pub fn from_table(table: &RawTable, task: &TaskDescription) -> Result<Self> {
        let col = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| SchemaError::MissingColumn {
                    column: name.to_string(),
                })
        };

        let id_idx = col(&task.id_column)?;
        let split_idx = col(SPLIT_COLUMN)?;
        let group_idx = table.column_index(GROUP_COLUMN);
        let tabular_idx = task
            .modality
            .tabular_columns
            .iter()
            .map(|c| col(c))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let image_idx = match &task.modality.image {
            Some(image) => Some(col(&image.column)?),
            None => None,
        };
        let label_idx = task
            .labels
            .iter()
            .map(|l| col(&l.name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let period_idx = match &task.period_column {
            Some(p) => Some(col(p)?),
            None => None,
        };

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(table.len());

        for row in table.rows() {
            let id = row[id_idx].clone();
            if id.is_empty() {
                return Err(SchemaError::EmptyCell {
                    record: format!("#{}", records.len() + 1),
                    column: task.id_column.clone(),
                }
                .into());
            }
            if !seen.insert(id.clone()) {
                return Err(SchemaError::DuplicateId { id }.into());
            }

            let split = row[split_idx]
                .parse::<Split>()
                .map_err(|_| SchemaError::InvalidSplit {
                    record: id.clone(),
                    value: row[split_idx].clone(),
                })?;

            let tabular = tabular_idx
                .iter()
                .zip(&task.modality.tabular_columns)
                .map(|(&i, name)| parse_number(&id, name, &row[i]))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let image = match image_idx {
                Some(i) => {
                    let raw = &row[i];
                    if raw.is_empty() {
                        return Err(SchemaError::EmptyCell {
                            record: id,
                            column: table.headers()[i].clone(),
                        }
                        .into());
                    }
                    let path = PathBuf::from(raw);
                    Some(match table.base_dir() {
                        Some(base) if path.is_relative() => base.join(path),
                        _ => path,
                    })
                }
                None => None,
            };

            let mut targets = Vec::with_capacity(task.labels.len());
            for (label, &i) in task.labels.iter().zip(&label_idx) {
                let raw = &row[i];
                let target = match &label.kind {
                    LabelKind::Categorical { .. } => {
                        let index =
                            label
                                .class_index(raw)
                                .ok_or_else(|| SchemaError::UnknownClass {
                                    record: id.clone(),
                                    column: label.name.clone(),
                                    value: raw.clone(),
                                })?;
                        Target::Class(index)
                    }
                    LabelKind::Continuous => Target::Value(parse_number(&id, &label.name, raw)?),
                    LabelKind::SurvivalRisk => {
                        Target::Event(parse_event(raw).ok_or_else(|| SchemaError::InvalidEvent {
                            record: id.clone(),
                            column: label.name.clone(),
                            value: raw.clone(),
                        })?)
                    }
                };
                targets.push(target);
            }

            let period = match period_idx {
                Some(i) => {
                    let raw = &row[i];
                    match raw.parse::<f32>() {
                        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
                        _ => {
                            return Err(SchemaError::InvalidPeriod {
                                record: id,
                                value: raw.clone(),
                            }
                            .into())
                        }
                    }
                }
                None => None,
            };

            let group = group_idx
                .map(|i| row[i].clone())
                .filter(|g| !g.is_empty());

            records.push(Record {
                id,
                split,
                group,
                tabular,
                image,
                targets,
                period,
            });
        }

        Ok(Self {
            task: task.clone(),
            records,
        })
    }

    pub fn task(&self) -> &TaskDescription {
        &self.task
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record indices belonging to `split`, in file order
    pub fn split_indices(&self, split: Split) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.split == split)
            .map(|(i, _)| i)
            .collect()
    }

    /// Fail if any of `splits` is empty
    pub fn require_splits(&self, splits: &[Split]) -> Result<()> {
        for split in splits {
            if !self.records.iter().any(|r| r.split == *split) {
                return Err(SchemaError::EmptySplit {
                    split: split.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn parse_number(record: &str, column: &str, raw: &str) -> std::result::Result<f32, SchemaError> {
    if raw.is_empty() {
        return Err(SchemaError::EmptyCell {
            record: record.to_string(),
            column: column.to_string(),
        });
    }
    match raw.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SchemaError::NonNumeric {
            record: record.to_string(),
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{infer_task, InferenceOptions};
    use crate::Error;

    fn load(headers: &[&str], rows: &[&[&str]]) -> Result<Dataset> {
        let table = RawTable::from_rows(headers, rows)?;
        let task = infer_task(&table, &InferenceOptions::default())?;
        Dataset::from_table(&table, &task)
    }

    #[test]
    fn test_typed_records() {
        let ds = load(
            &["uniqID", "group", "input_age", "input_bmi", "label_dx", "split"],
            &[
                &["a", "site1", "50", "22.5", "1", "train"],
                &["b", "", "61", "30.1", "0", "val"],
            ],
        )
        .unwrap();

        let first = &ds.records()[0];
        assert_eq!(first.tabular, vec![50.0, 22.5]);
        assert_eq!(first.targets, vec![Target::Class(1)]);
        assert_eq!(first.group.as_deref(), Some("site1"));
        assert_eq!(ds.records()[1].group, None);
        assert_eq!(ds.split_indices(Split::Val), vec![1]);
    }

    #[test]
    fn test_duplicate_id() {
        let err = load(
            &["id", "label_a", "split"],
            &[&["x", "0", "train"], &["x", "1", "val"]],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::DuplicateId { ref id }) if id == "x"));
    }

    #[test]
    fn test_invalid_split() {
        let err = load(
            &["id", "label_a", "split"],
            &[&["x", "0", "train"], &["y", "1", "holdout"]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::InvalidSplit { ref record, .. }) if record == "y"
        ));
    }

    #[test]
    fn test_non_numeric_input_names_cell() {
        let err = load(
            &["id", "input_age", "label_a", "split"],
            &[&["x", "old", "0", "train"], &["y", "3", "1", "val"]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::NonNumeric { ref column, .. }) if column == "input_age"
        ));
    }

    #[test]
    fn test_unknown_class_against_stored_task() {
        let train = RawTable::from_rows(
            &["id", "label_a", "split"],
            &[&["x", "0", "train"], &["y", "1", "val"]],
        )
        .unwrap();
        let task = infer_task(&train, &InferenceOptions::default()).unwrap();

        let later = RawTable::from_rows(&["id", "label_a", "split"], &[&["z", "7", "test"]]).unwrap();
        let err = Dataset::from_table(&later, &task).unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::UnknownClass { .. })));
    }

    #[test]
    fn test_survival_periods() {
        let ds = load(
            &["id", "label_e", "periods", "split"],
            &[&["x", "1", "3.5", "train"], &["y", "0", "7", "val"]],
        )
        .unwrap();
        assert_eq!(ds.records()[0].period, Some(3.5));
        assert_eq!(ds.records()[1].targets, vec![Target::Event(false)]);
    }

    #[test]
    fn test_negative_period_rejected() {
        let err = load(
            &["id", "label_e", "periods", "split"],
            &[&["x", "1", "-1", "train"], &["y", "0", "7", "val"]],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_require_splits() {
        let ds = load(
            &["id", "label_a", "split"],
            &[&["x", "0", "train"], &["y", "1", "train"]],
        )
        .unwrap();
        assert!(ds.require_splits(&[Split::Train]).is_ok());
        assert!(matches!(
            ds.require_splits(&[Split::Train, Split::Val]),
            Err(Error::Schema(SchemaError::EmptySplit { .. }))
        ));
    }

    #[test]
    fn test_relative_image_paths_resolve_against_csv_dir() {
        let table = RawTable::from_rows(
            &["id", "imgpath", "label_a", "split"],
            &[&["x", "img/x.f32", "0", "train"], &["y", "/abs/y.f32", "1", "val"]],
        )
        .unwrap()
        .with_base_dir("/data/study");
        let task = infer_task(&table, &InferenceOptions::default()).unwrap();
        let ds = Dataset::from_table(&table, &task).unwrap();
        assert_eq!(
            ds.records()[0].image.as_deref(),
            Some(std::path::Path::new("/data/study/img/x.f32"))
        );
        assert_eq!(
            ds.records()[1].image.as_deref(),
            Some(std::path::Path::new("/abs/y.f32"))
        );
    }
}
