//! Task strategy: the closed set of loss/metric families

use super::loss::{cox_partial_likelihood, cross_entropy, softmax_rows, RegressionLoss};
use super::metrics::{concordance_index, macro_roc, roc_curve, CensoringRule, RocCurve, ScatterSummary};
use crate::autograd::add_all;
use crate::error::TaskStrategyError;
use crate::schema::{LabelKind, LabelSpec, TaskDescription, TaskKind};
use crate::{Error, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Loss criterion as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    #[serde(rename = "CEL")]
    CrossEntropy,
    #[serde(rename = "MSE")]
    Mse,
    #[serde(rename = "RMSE")]
    Rmse,
    #[serde(rename = "MAE")]
    Mae,
    #[serde(rename = "NLL")]
    CoxNll,
}

impl Criterion {
    pub fn name(&self) -> &'static str {
        match self {
            Criterion::CrossEntropy => "CEL",
            Criterion::Mse => "MSE",
            Criterion::Rmse => "RMSE",
            Criterion::Mae => "MAE",
            Criterion::CoxNll => "NLL",
        }
    }

    pub fn default_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Classification => Criterion::CrossEntropy,
            TaskKind::Regression => Criterion::Mse,
            TaskKind::Survival => Criterion::CoxNll,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Criterion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CEL" | "CE" | "CROSSENTROPY" => Ok(Criterion::CrossEntropy),
            "MSE" => Ok(Criterion::Mse),
            "RMSE" => Ok(Criterion::Rmse),
            "MAE" => Ok(Criterion::Mae),
            "NLL" | "DEEPSURV" => Ok(Criterion::CoxNll),
            _ => Err(format!(
                "Unknown criterion: {s}. Valid criteria: CEL, MSE, RMSE, MAE, NLL"
            )),
        }
    }
}

/// Ground truth of one head for a batch of records
#[derive(Debug, Clone, PartialEq)]
pub enum HeadTargets {
    Classes(Vec<usize>),
    Values(Vec<f32>),
    Survival { events: Vec<bool>, periods: Vec<f32> },
}

impl HeadTargets {
    pub fn len(&self) -> usize {
        match self {
            HeadTargets::Classes(c) => c.len(),
            HeadTargets::Values(v) => v.len(),
            HeadTargets::Survival { events, .. } => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind_name(&self) -> &'static str {
        match self {
            HeadTargets::Classes(_) => "classes",
            HeadTargets::Values(_) => "values",
            HeadTargets::Survival { .. } => "survival",
        }
    }

    /// Append another batch of the same kind
    pub fn extend(&mut self, other: &HeadTargets) -> Result<()> {
        let (expected, found) = (self.kind_name(), other.kind_name());
        match (self, other) {
            (HeadTargets::Classes(a), HeadTargets::Classes(b)) => a.extend_from_slice(b),
            (HeadTargets::Values(a), HeadTargets::Values(b)) => a.extend_from_slice(b),
            (
                HeadTargets::Survival { events, periods },
                HeadTargets::Survival {
                    events: e,
                    periods: p,
                },
            ) => {
                events.extend_from_slice(e);
                periods.extend_from_slice(p);
            }
            _ => return Err(TaskStrategyError::TargetKindMismatch { expected, found }.into()),
        }
        Ok(())
    }

    /// Empty targets shaped for `label`
    pub fn empty_for(label: &LabelSpec) -> Self {
        match label.kind {
            LabelKind::Categorical { .. } => HeadTargets::Classes(Vec::new()),
            LabelKind::Continuous => HeadTargets::Values(Vec::new()),
            LabelKind::SurvivalRisk => HeadTargets::Survival {
                events: Vec::new(),
                periods: Vec::new(),
            },
        }
    }
}

/// Detached per-record output of one head: probabilities, value or risk
#[derive(Debug, Clone, PartialEq)]
pub struct HeadPrediction {
    pub width: usize,
    /// records×width, row-major
    pub values: Vec<f32>,
}

impl HeadPrediction {
    pub fn empty(width: usize) -> Self {
        Self {
            width,
            values: Vec::new(),
        }
    }

    pub fn records(&self) -> usize {
        self.values.len() / self.width.max(1)
    }

    pub fn row(&self, record: usize) -> &[f32] {
        &self.values[record * self.width..(record + 1) * self.width]
    }

    pub fn extend(&mut self, other: &HeadPrediction) {
        self.values.extend_from_slice(&other.values);
    }
}

/// Summed loss plus the detached value of each head
pub struct LossBreakdown {
    pub total: Tensor,
    pub per_head: Vec<f32>,
}

/// One head's evaluation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricReport {
    Roc(RocCurve),
    Scatter(ScatterSummary),
    Concordance { c_index: f32 },
}

impl MetricReport {
    /// `auc`, `r2` or `c_index`
    pub fn metric_name(&self) -> &'static str {
        match self {
            MetricReport::Roc(_) => "auc",
            MetricReport::Scatter(_) => "r2",
            MetricReport::Concordance { .. } => "c_index",
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            MetricReport::Roc(roc) => roc.auc,
            MetricReport::Scatter(scatter) => scatter.r2,
            MetricReport::Concordance { c_index } => *c_index,
        }
    }

    /// One-line score, e.g. `auc=0.8125`
    pub fn headline(&self) -> String {
        format!("{}={:.4}", self.metric_name(), self.score())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadReport {
    pub label: String,
    #[serde(flatten)]
    pub report: MetricReport,
}

/// Loss and metric family, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStrategy {
    Classification,
    Regression(RegressionLoss),
    Survival,
}

impl TaskStrategy {
    /// Pick the strategy for `kind`; a criterion from another family is rejected
    pub fn new(kind: TaskKind, criterion: Option<Criterion>) -> Result<Self> {
        let criterion = criterion.unwrap_or_else(|| Criterion::default_for(kind));
        let strategy = match (kind, criterion) {
            (TaskKind::Classification, Criterion::CrossEntropy) => TaskStrategy::Classification,
            (TaskKind::Regression, Criterion::Mse) => TaskStrategy::Regression(RegressionLoss::Mse),
            (TaskKind::Regression, Criterion::Rmse) => {
                TaskStrategy::Regression(RegressionLoss::Rmse)
            }
            (TaskKind::Regression, Criterion::Mae) => TaskStrategy::Regression(RegressionLoss::Mae),
            (TaskKind::Survival, Criterion::CoxNll) => TaskStrategy::Survival,
            (kind, criterion) => {
                return Err(TaskStrategyError::CriterionMismatch {
                    criterion: criterion.to_string(),
                    task: kind.to_string(),
                }
                .into())
            }
        };
        Ok(strategy)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskStrategy::Classification => TaskKind::Classification,
            TaskStrategy::Regression(_) => TaskKind::Regression,
            TaskStrategy::Survival => TaskKind::Survival,
        }
    }

    pub fn criterion(&self) -> Criterion {
        match self {
            TaskStrategy::Classification => Criterion::CrossEntropy,
            TaskStrategy::Regression(RegressionLoss::Mse) => Criterion::Mse,
            TaskStrategy::Regression(RegressionLoss::Rmse) => Criterion::Rmse,
            TaskStrategy::Regression(RegressionLoss::Mae) => Criterion::Mae,
            TaskStrategy::Survival => Criterion::CoxNll,
        }
    }

    fn check_heads(task: &TaskDescription, outputs: usize, targets: usize) -> Result<()> {
        let expected = task.labels.len();
        for got in [outputs, targets] {
            if got != expected {
                return Err(TaskStrategyError::HeadMismatch { expected, got }.into());
            }
        }
        Ok(())
    }

    /// Unweighted sum of per-head losses
    pub fn loss(
        &self,
        task: &TaskDescription,
        outputs: &[Tensor],
        targets: &[HeadTargets],
    ) -> Result<LossBreakdown> {
        Self::check_heads(task, outputs.len(), targets.len())?;

        let mut losses = Vec::with_capacity(outputs.len());
        for ((label, output), target) in task.labels.iter().zip(outputs).zip(targets) {
            let loss = match (self, target) {
                (TaskStrategy::Classification, HeadTargets::Classes(classes)) => {
                    cross_entropy(output, classes, label.output_width())
                }
                (TaskStrategy::Regression(kind), HeadTargets::Values(values)) => {
                    kind.forward(output, values)
                }
                (TaskStrategy::Survival, HeadTargets::Survival { events, periods }) => {
                    cox_partial_likelihood(output, periods, events)?
                }
                _ => return Err(self.target_mismatch(label)),
            };
            if !loss.item().is_finite() {
                return Err(TaskStrategyError::NonFiniteLoss {
                    label: label.name.clone(),
                }
                .into());
            }
            losses.push(loss);
        }

        let per_head = losses.iter().map(Tensor::item).collect();
        let total = add_all(&losses).ok_or(TaskStrategyError::HeadMismatch {
            expected: task.labels.len(),
            got: 0,
        })?;
        Ok(LossBreakdown { total, per_head })
    }

    fn target_mismatch(&self, label: &LabelSpec) -> Error {
        TaskStrategyError::CriterionMismatch {
            criterion: self.criterion().to_string(),
            task: format!("{} ({})", self.kind(), label.name),
        }
        .into()
    }

    /// Detach head outputs into reportable predictions
    pub fn predict(&self, task: &TaskDescription, outputs: &[Tensor]) -> Vec<HeadPrediction> {
        task.labels
            .iter()
            .zip(outputs)
            .map(|(label, output)| {
                let width = label.output_width();
                let raw = output.data().to_vec();
                let values = match self {
                    TaskStrategy::Classification => softmax_rows(&raw, width),
                    _ => raw,
                };
                HeadPrediction { width, values }
            })
            .collect()
    }

    /// One report per head; survival yields exactly one
    pub fn metrics(
        &self,
        task: &TaskDescription,
        predictions: &[HeadPrediction],
        targets: &[HeadTargets],
        censoring: CensoringRule,
    ) -> Result<Vec<HeadReport>> {
        Self::check_heads(task, predictions.len(), targets.len())?;

        task.labels
            .iter()
            .zip(predictions)
            .zip(targets)
            .map(|((label, prediction), target)| {
                if target.is_empty() {
                    return Err(TaskStrategyError::EmptyEvaluation {
                        label: label.name.clone(),
                    }
                    .into());
                }
                let report = match (self, target) {
                    (TaskStrategy::Classification, HeadTargets::Classes(truth)) => {
                        MetricReport::Roc(classification_roc(label, prediction, truth)?)
                    }
                    (TaskStrategy::Regression(_), HeadTargets::Values(observed)) => {
                        MetricReport::Scatter(ScatterSummary::new(
                            observed.clone(),
                            prediction.values.clone(),
                        ))
                    }
                    (TaskStrategy::Survival, HeadTargets::Survival { events, periods }) => {
                        let c_index =
                            concordance_index(&prediction.values, periods, events, censoring)
                                .ok_or_else(|| TaskStrategyError::EmptyEvaluation {
                                    label: label.name.clone(),
                                })?;
                        MetricReport::Concordance { c_index }
                    }
                    _ => return Err(self.target_mismatch(label)),
                };
                Ok(HeadReport {
                    label: label.name.clone(),
                    report,
                })
            })
            .collect()
    }
}

fn classification_roc(
    label: &LabelSpec,
    prediction: &HeadPrediction,
    truth: &[usize],
) -> Result<RocCurve> {
    let observed: HashSet<usize> = truth.iter().copied().collect();
    let single_class = || TaskStrategyError::SingleClass {
        label: label.name.clone(),
        found: observed.len(),
    };
    if observed.len() < 2 {
        return Err(single_class().into());
    }

    let curve = if prediction.width == 2 {
        let scores: Vec<f32> = prediction.values.chunks(2).map(|row| row[1]).collect();
        let positives: Vec<bool> = truth.iter().map(|&t| t == 1).collect();
        roc_curve(&scores, &positives)
    } else {
        macro_roc(&prediction.values, prediction.width, truth)
    };
    curve.ok_or_else(|| single_class().into())
}
