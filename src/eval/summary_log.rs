//! Project-wide `summary/summary.csv`
//!
//! Every test run appends one row per (checkpoint, group) so runs can be
//! compared over time. Columns: `datetime, weight, group`, then
//! `<label>_<split>_<metric>` for each label and evaluated split.

use super::engine::SplitEvaluation;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const SUMMARY_LOG_DIR: &str = "summary";
pub const SUMMARY_LOG_FILE: &str = "summary.csv";

/// `<output_dir>/summary/summary.csv`
pub fn summary_log_path(output_dir: impl AsRef<Path>) -> PathBuf {
    output_dir
        .as_ref()
        .join(SUMMARY_LOG_DIR)
        .join(SUMMARY_LOG_FILE)
}

/// Rows contributed by one evaluated checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRows {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SummaryRows {
    /// One row per group, groups sorted, ungrouped records first
    pub fn new(datetime: &str, weight: &str, splits: &[SplitEvaluation]) -> Self {
        let mut labels: Vec<&str> = Vec::new();
        let mut columns: Vec<(usize, String)> = Vec::new();
        let mut by_group: BTreeMap<Option<&str>, HashMap<String, String>> = BTreeMap::new();
        for evaluation in splits {
            let cells = by_group.entry(evaluation.group.as_deref()).or_default();
            for head in &evaluation.reports {
                let label = match labels.iter().position(|l| *l == head.label) {
                    Some(i) => i,
                    None => {
                        labels.push(&head.label);
                        labels.len() - 1
                    }
                };
                let column = format!(
                    "{}_{}_{}",
                    head.label,
                    evaluation.split,
                    head.report.metric_name()
                );
                if !columns.iter().any(|(_, c)| *c == column) {
                    columns.push((label, column.clone()));
                }
                cells.insert(column, format!("{:.4}", head.report.score()));
            }
        }
        // label-major: label_a_val, label_a_test, label_b_val, ...
        columns.sort_by_key(|(label, _)| *label);
        let columns: Vec<String> = columns.into_iter().map(|(_, c)| c).collect();

        let mut header = vec![
            "datetime".to_string(),
            "weight".to_string(),
            "group".to_string(),
        ];
        header.extend(columns.iter().cloned());

        let rows = by_group
            .into_iter()
            .map(|(group, mut cells)| {
                let mut row = vec![
                    datetime.to_string(),
                    weight.to_string(),
                    group.unwrap_or_default().to_string(),
                ];
                row.extend(columns.iter().map(|c| cells.remove(c).unwrap_or_default()));
                row
            })
            .collect();

        Self { header, rows }
    }

    /// Append to `path`, writing the header only when the file is new
    ///
    /// Rows of an existing file keep its column layout: cells for columns it
    /// lacks are dropped and missing cells are left empty.
    pub fn append(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let existing = if path.is_file() {
            let mut reader = csv::Reader::from_path(path)?;
            let header = reader.headers()?.clone();
            (!header.is_empty()).then(|| header.iter().map(str::to_string).collect::<Vec<_>>())
        } else {
            None
        };

        match existing {
            Some(header) => {
                let dropped: Vec<&String> = self
                    .header
                    .iter()
                    .filter(|c| !header.contains(c))
                    .collect();
                if !dropped.is_empty() {
                    tracing::warn!(
                        path = %path.display(),
                        columns = ?dropped,
                        "summary columns not in existing log"
                    );
                }
                let file = OpenOptions::new().append(true).open(path)?;
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(file);
                for row in &self.rows {
                    let aligned = header.iter().map(|column| {
                        self.header
                            .iter()
                            .position(|c| c == column)
                            .map_or("", |i| row[i].as_str())
                    });
                    writer.write_record(aligned)?;
                }
                writer.flush()?;
            }
            None => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut writer = csv::Writer::from_path(path)?;
                writer.write_record(&self.header)?;
                for row in &self.rows {
                    writer.write_record(row)?;
                }
                writer.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Split;
    use crate::task::{HeadReport, MetricReport};

    fn evaluation(split: Split, group: Option<&str>, scores: &[(&str, f32)]) -> SplitEvaluation {
        SplitEvaluation {
            split,
            group: group.map(str::to_string),
            records: 4,
            reports: scores
                .iter()
                .map(|&(label, c_index)| HeadReport {
                    label: label.to_string(),
                    report: MetricReport::Concordance { c_index },
                })
                .collect(),
        }
    }

    #[test]
    fn test_rows_per_group_with_label_major_columns() {
        let splits = [
            evaluation(Split::Val, Some("B"), &[("label_a", 0.6), ("label_b", 0.7)]),
            evaluation(Split::Test, Some("B"), &[("label_a", 0.65), ("label_b", 0.75)]),
            evaluation(Split::Val, Some("A"), &[("label_a", 0.5), ("label_b", 0.55)]),
        ];
        let summary = SummaryRows::new("2026-01-02-03-04-05", "weight_best", &splits);
        assert_eq!(
            summary.header,
            vec![
                "datetime",
                "weight",
                "group",
                "label_a_val_c_index",
                "label_a_test_c_index",
                "label_b_val_c_index",
                "label_b_test_c_index",
            ]
        );
        assert_eq!(
            summary.rows,
            vec![
                vec!["2026-01-02-03-04-05", "weight_best", "A", "0.5000", "", "0.5500", ""],
                vec![
                    "2026-01-02-03-04-05",
                    "weight_best",
                    "B",
                    "0.6000",
                    "0.6500",
                    "0.7000",
                    "0.7500"
                ],
            ]
        );
    }

    #[test]
    fn test_append_keeps_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = summary_log_path(dir.path());
        let splits = [evaluation(Split::Test, None, &[("label_a", 0.8)])];

        SummaryRows::new("run1", "weight_best", &splits)
            .append(&path)
            .unwrap();
        SummaryRows::new("run2", "weight_best", &splits)
            .append(&path)
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "datetime,weight,group,label_a_test_c_index",
                "run1,weight_best,,0.8000",
                "run2,weight_best,,0.8000",
            ]
        );
    }

    #[test]
    fn test_append_aligns_to_existing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        std::fs::write(&path, "datetime,weight,group,label_a_val_c_index,extra\n").unwrap();

        let splits = [evaluation(Split::Test, Some("A"), &[("label_a", 0.9)])];
        SummaryRows::new("run", "w", &splits).append(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1), Some("run,w,A,,"));
    }
}
