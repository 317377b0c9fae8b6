//! Task description types produced by schema inference

use crate::error::TaskStrategyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task family, fixed for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "classification")]
    Classification,
    #[serde(rename = "regression")]
    Regression,
    #[serde(rename = "deepsurv")]
    Survival,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Regression => write!(f, "regression"),
            Self::Survival => write!(f, "deepsurv"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "classification" => Ok(Self::Classification),
            "regression" => Ok(Self::Regression),
            "deepsurv" | "survival" => Ok(Self::Survival),
            _ => Err(format!(
                "Unknown task: {s}. Valid tasks: classification, regression, deepsurv"
            )),
        }
    }
}

/// Value type of one label column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelKind {
    /// Ordered class values; output width is the class count
    Categorical { classes: Vec<String> },
    Continuous,
    /// Event indicator driving a single scalar risk output
    SurvivalRisk,
}

/// One label column and how its head is shaped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub name: String,
    pub kind: LabelKind,
}

impl LabelSpec {
    /// Categorical label; fewer than two classes cannot be learned
    pub fn categorical(
        name: impl Into<String>,
        classes: Vec<String>,
    ) -> Result<Self, TaskStrategyError> {
        let name = name.into();
        if classes.len() < 2 {
            return Err(TaskStrategyError::SingleClass {
                label: name,
                found: classes.len(),
            });
        }
        Ok(Self {
            name,
            kind: LabelKind::Categorical { classes },
        })
    }

    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LabelKind::Continuous,
        }
    }

    pub fn survival(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LabelKind::SurvivalRisk,
        }
    }

    /// Width of the head attached for this label
    pub fn output_width(&self) -> usize {
        match &self.kind {
            LabelKind::Categorical { classes } => classes.len(),
            LabelKind::Continuous | LabelKind::SurvivalRisk => 1,
        }
    }

    pub fn classes(&self) -> Option<&[String]> {
        match &self.kind {
            LabelKind::Categorical { classes } => Some(classes),
            _ => None,
        }
    }

    pub fn class_index(&self, value: &str) -> Option<usize> {
        self.classes()?.iter().position(|c| c == value)
    }
}

/// Image input attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageModality {
    pub column: String,
    pub channels: usize,
    pub pretrained: bool,
}

/// Which inputs the schema offers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModalityDescriptor {
    pub tabular_columns: Vec<String>,
    pub image: Option<ImageModality>,
}

impl ModalityDescriptor {
    pub fn has_tabular(&self) -> bool {
        !self.tabular_columns.is_empty()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Everything downstream components need to know about a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub kind: TaskKind,
    /// Label specs in declaration order; one head each
    pub labels: Vec<LabelSpec>,
    pub modality: ModalityDescriptor,
    pub id_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_column: Option<String>,
}

impl TaskDescription {
    pub fn is_survival(&self) -> bool {
        self.kind == TaskKind::Survival
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}
