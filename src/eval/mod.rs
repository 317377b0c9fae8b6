//! Evaluation engine
//!
//! Loads persisted checkpoints, runs every record of the requested splits
//! forward once, and routes (prediction, truth) pairs to the task
//! strategy's metrics. One report per head, split and group.

mod engine;
mod likelihood;
mod summary;
mod summary_log;

pub use engine::{EvalOptions, Evaluation, Evaluator, RecordFailure, SplitEvaluation};
pub use likelihood::LikelihoodTable;
pub use summary::{
    evaluate_weight_dir, CheckpointSummary, EvaluationSummary, LIKELIHOOD_DIR, SUMMARY_FILE,
};
pub use summary_log::{summary_log_path, SummaryRows, SUMMARY_LOG_DIR, SUMMARY_LOG_FILE};
