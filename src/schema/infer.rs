//! Task inference from column names and observed label values
//!
//! The column roles are fixed by naming convention (see [`super::table`]).
//! The task family comes from an optional hint; without one it is read off
//! the data: a `periods` column means survival, non-integral numeric labels
//! mean regression, anything else is classification.

use super::table::{
    RawTable, IMAGE_COLUMN, INPUT_PREFIX, LABEL_PREFIX, PERIOD_COLUMN, SPLIT_COLUMN,
};
use super::types::{ImageModality, LabelSpec, ModalityDescriptor, TaskDescription, TaskKind};
use crate::error::{Result, SchemaError};
use std::collections::BTreeSet;

/// Options that shape inference but are not visible in the CSV
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOptions {
    /// Forces the task family instead of reading it off the data
    pub task: Option<TaskKind>,
    pub in_channel: usize,
    pub pretrained: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            task: None,
            in_channel: 1,
            pretrained: false,
        }
    }
}

/// Observed value profile of one label column
#[derive(Debug, Clone, Default)]
struct LabelProfile {
    all_numeric: bool,
    all_integers: bool,
    distinct: BTreeSet<String>,
}

/// Derive the task description from a raw table
pub fn infer_task(table: &RawTable, options: &InferenceOptions) -> Result<TaskDescription> {
    let id_column = table
        .id_column()
        .ok_or_else(|| SchemaError::MissingColumn {
            column: "uniqID".to_string(),
        })?
        .to_string();
    if table.column_index(SPLIT_COLUMN).is_none() {
        return Err(SchemaError::MissingColumn {
            column: SPLIT_COLUMN.to_string(),
        }
        .into());
    }

    let label_columns = table.columns_with_prefix(LABEL_PREFIX);
    if label_columns.is_empty() {
        return Err(SchemaError::NoLabelColumn.into());
    }

    let has_periods = table.column_index(PERIOD_COLUMN).is_some();
    let profiles = label_columns
        .iter()
        .map(|column| profile_label(table, &id_column, column))
        .collect::<Result<Vec<_>>>()?;

    let kind = options.task.unwrap_or_else(|| {
        if has_periods {
            TaskKind::Survival
        } else if profiles.iter().any(|p| p.all_numeric && !p.all_integers) {
            TaskKind::Regression
        } else {
            TaskKind::Classification
        }
    });

    let labels = match kind {
        TaskKind::Classification => label_columns
            .iter()
            .zip(&profiles)
            .map(|(column, profile)| {
                LabelSpec::categorical(column.clone(), ordered_classes(profile))
                    .map_err(crate::Error::from)
            })
            .collect::<Result<Vec<_>>>()?,
        TaskKind::Regression => {
            for column in &label_columns {
                require_numeric(table, &id_column, column)?;
            }
            label_columns.iter().map(LabelSpec::continuous).collect()
        }
        TaskKind::Survival => {
            if !has_periods {
                return Err(SchemaError::MissingPeriodColumn {
                    column: PERIOD_COLUMN.to_string(),
                }
                .into());
            }
            if label_columns.len() != 1 {
                return Err(SchemaError::SurvivalLabelCount {
                    found: label_columns.len(),
                }
                .into());
            }
            require_events(table, &id_column, &label_columns[0])?;
            vec![LabelSpec::survival(label_columns[0].clone())]
        }
    };

    let modality = ModalityDescriptor {
        tabular_columns: table.columns_with_prefix(INPUT_PREFIX),
        image: table.column_index(IMAGE_COLUMN).map(|_| ImageModality {
            column: IMAGE_COLUMN.to_string(),
            channels: options.in_channel,
            pretrained: options.pretrained,
        }),
    };

    tracing::debug!(
        task = %kind,
        labels = labels.len(),
        tabular = modality.tabular_columns.len(),
        image = modality.has_image(),
        "inferred task"
    );

    Ok(TaskDescription {
        kind,
        labels,
        modality,
        id_column,
        period_column: (kind == TaskKind::Survival).then(|| PERIOD_COLUMN.to_string()),
    })
}

fn profile_label(table: &RawTable, id_column: &str, column: &str) -> Result<LabelProfile> {
    let idx = column_position(table, column)?;
    let id_idx = column_position(table, id_column)?;

    let mut profile = LabelProfile {
        all_numeric: true,
        all_integers: true,
        distinct: BTreeSet::new(),
    };
    for row in table.rows() {
        let value = &row[idx];
        if value.is_empty() {
            return Err(SchemaError::EmptyCell {
                record: row[id_idx].clone(),
                column: column.to_string(),
            }
            .into());
        }
        match value.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                if v.fract() != 0.0 {
                    profile.all_integers = false;
                }
            }
            _ => {
                profile.all_numeric = false;
                profile.all_integers = false;
            }
        }
        profile.distinct.insert(value.clone());
    }
    Ok(profile)
}

/// Integer classes sort numerically, anything else lexicographically
fn ordered_classes(profile: &LabelProfile) -> Vec<String> {
    let mut classes: Vec<String> = profile.distinct.iter().cloned().collect();
    if profile.all_integers {
        classes.sort_by(|a, b| {
            let a = a.parse::<f64>().unwrap_or(f64::NAN);
            let b = b.parse::<f64>().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        });
    }
    classes
}

fn require_numeric(table: &RawTable, id_column: &str, column: &str) -> Result<()> {
    let idx = column_position(table, column)?;
    let id_idx = column_position(table, id_column)?;
    for row in table.rows() {
        let value = &row[idx];
        if !value.parse::<f32>().is_ok_and(f32::is_finite) {
            return Err(SchemaError::NonNumeric {
                record: row[id_idx].clone(),
                column: column.to_string(),
                value: value.clone(),
            }
            .into());
        }
    }
    Ok(())
}

fn require_events(table: &RawTable, id_column: &str, column: &str) -> Result<()> {
    let idx = column_position(table, column)?;
    let id_idx = column_position(table, id_column)?;
    for row in table.rows() {
        if parse_event(&row[idx]).is_none() {
            return Err(SchemaError::InvalidEvent {
                record: row[id_idx].clone(),
                column: column.to_string(),
                value: row[idx].clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Event indicator: 1 = event observed, 0 = censored
pub(crate) fn parse_event(value: &str) -> Option<bool> {
    match value.parse::<f64>() {
        Ok(v) if v == 1.0 => Some(true),
        Ok(v) if v == 0.0 => Some(false),
        _ => None,
    }
}

fn column_position(table: &RawTable, column: &str) -> Result<usize> {
    table.column_index(column).ok_or_else(|| {
        SchemaError::MissingColumn {
            column: column.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TaskStrategyError};
    use crate::schema::LabelKind;

    fn infer(headers: &[&str], rows: &[&[&str]]) -> Result<TaskDescription> {
        let table = RawTable::from_rows(headers, rows).unwrap();
        infer_task(&table, &InferenceOptions::default())
    }

    #[test]
    fn test_labels_keep_declaration_order() {
        let task = infer(
            &["uniqID", "label_z", "label_a", "label_m", "split"],
            &[
                &["1", "0", "1", "2", "train"],
                &["2", "1", "0", "0", "val"],
                &["3", "0", "1", "1", "test"],
            ],
        )
        .unwrap();

        assert_eq!(task.kind, TaskKind::Classification);
        assert_eq!(task.label_names(), vec!["label_z", "label_a", "label_m"]);
        assert_eq!(task.labels[2].output_width(), 3);
    }

    #[test]
    fn test_numeric_classes_sort_numerically() {
        let task = infer(
            &["id", "label_grade", "split"],
            &[
                &["1", "10", "train"],
                &["2", "2", "train"],
                &["3", "1", "val"],
            ],
        )
        .unwrap();
        assert_eq!(
            task.labels[0].kind,
            LabelKind::Categorical {
                classes: vec!["1".into(), "2".into(), "10".into()]
            }
        );
    }

    #[test]
    fn test_fractional_labels_infer_regression() {
        let task = infer(
            &["id", "imgpath", "label_FEV1", "label_FEV2", "split"],
            &[
                &["1", "a.f32", "2.31", "1.80", "train"],
                &["2", "b.f32", "3.05", "2.75", "val"],
            ],
        )
        .unwrap();

        assert_eq!(task.kind, TaskKind::Regression);
        assert_eq!(task.labels.len(), 2);
        assert!(task.modality.has_image());
        assert!(!task.modality.has_tabular());
    }

    #[test]
    fn test_periods_infer_survival() {
        let task = infer(
            &["uniqID", "input_age", "label_death", "periods", "split"],
            &[
                &["1", "60", "1", "5", "train"],
                &["2", "70", "0", "8", "val"],
            ],
        )
        .unwrap();
        assert!(task.is_survival());
        assert_eq!(task.labels[0].kind, LabelKind::SurvivalRisk);
        assert_eq!(task.period_column.as_deref(), Some("periods"));
    }

    #[test]
    fn test_no_label_column() {
        let err = infer(&["id", "input_a", "split"], &[&["1", "2", "train"]]).unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::NoLabelColumn)));
    }

    #[test]
    fn test_survival_hint_without_periods() {
        let table =
            RawTable::from_rows(&["id", "label_e", "split"], &[&["1", "1", "train"]]).unwrap();
        let options = InferenceOptions {
            task: Some(TaskKind::Survival),
            ..Default::default()
        };
        let err = infer_task(&table, &options).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingPeriodColumn { .. })
        ));
    }

    #[test]
    fn test_survival_requires_binary_event() {
        let err = infer(
            &["id", "label_e", "periods", "split"],
            &[&["1", "1", "3", "train"], &["2", "2", "4", "val"]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::InvalidEvent { ref record, .. }) if record == "2"
        ));
    }

    #[test]
    fn test_regression_hint_with_text_names_record() {
        let table = RawTable::from_rows(
            &["id", "label_fev", "split"],
            &[&["p1", "2.5", "train"], &["p2", "high", "val"]],
        )
        .unwrap();
        let options = InferenceOptions {
            task: Some(TaskKind::Regression),
            ..Default::default()
        };
        let err = infer_task(&table, &options).unwrap_err();
        match err {
            Error::Schema(SchemaError::NonNumeric {
                record,
                column,
                value,
            }) => {
                assert_eq!(record, "p2");
                assert_eq!(column, "label_fev");
                assert_eq!(value, "high");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_observed_class() {
        let err = infer(
            &["id", "label_a", "split"],
            &[&["1", "1", "train"], &["2", "1", "val"]],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::TaskStrategy(TaskStrategyError::SingleClass { .. })
        ));
    }

    #[test]
    fn test_text_classes() {
        let task = infer(
            &["id", "label_dx", "split"],
            &[&["1", "malignant", "train"], &["2", "benign", "val"]],
        )
        .unwrap();
        assert_eq!(
            task.labels[0].classes().unwrap(),
            &["benign".to_string(), "malignant".to_string()]
        );
    }
}
