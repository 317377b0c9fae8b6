//! Task strategies
//!
//! A [`TaskStrategy`] is chosen once per run from the task kind and the
//! configured criterion. It turns per-head outputs into a summed loss during
//! training and into per-head metric reports during evaluation.

mod loss;
mod metrics;
mod strategy;

pub use loss::{cox_partial_likelihood, cross_entropy, softmax_rows, RegressionLoss};
pub use metrics::{
    concordance_index, macro_roc, r_squared, roc_curve, CensoringRule, RocCurve, ScatterSummary,
};
pub use strategy::{
    Criterion, HeadPrediction, HeadReport, HeadTargets, LossBreakdown, MetricReport, TaskStrategy,
};
