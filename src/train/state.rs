//! Explicit run state and the checkpoint decision
//!
//! The decision depends only on the run state and the epoch's validation
//! loss, so it can be tested without a model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which checkpoints a run keeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointPolicy {
    /// One file, overwritten whenever val loss improves
    #[default]
    Best,
    /// One file per epoch
    Each,
}

impl FromStr for CheckpointPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best" => Ok(CheckpointPolicy::Best),
            "each" => Ok(CheckpointPolicy::Each),
            _ => Err(format!("Unknown save_weight_policy: {s}. Valid: best, each")),
        }
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointPolicy::Best => write!(f, "best"),
            CheckpointPolicy::Each => write!(f, "each"),
        }
    }
}

/// How an epoch whose val loss equals the best so far is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Equal loss never replaces the best epoch
    #[default]
    EarliestEpoch,
    /// Equal loss replaces the best epoch
    LatestEpoch,
}

/// Outcome of one epoch's checkpoint decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointDecision {
    /// Val loss became the new best
    pub improved: bool,
    /// A checkpoint file must be written this epoch
    pub persist: bool,
    /// First finite val loss of the run; it sets the best without beating one
    pub seeded: bool,
}

impl CheckpointDecision {
    /// Val loss beat an earlier best
    pub fn updated(&self) -> bool {
        self.improved && !self.seeded
    }
}

/// Phases of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    Initializing,
    TrainingEpoch(usize),
    Validating(usize),
    CheckpointDecision(usize),
    Finalizing,
}

/// Mutable bookkeeping of a run, independent of the model
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub epoch: usize,
    pub best_val_loss: Option<f32>,
    pub best_epoch: Option<usize>,
    pub policy: CheckpointPolicy,
    pub tie_break: TieBreak,
}

impl RunState {
    pub fn new(policy: CheckpointPolicy, tie_break: TieBreak) -> Self {
        Self {
            epoch: 0,
            best_val_loss: None,
            best_epoch: None,
            policy,
            tie_break,
        }
    }

    fn is_improvement(&self, val_loss: f32) -> bool {
        if !val_loss.is_finite() {
            return false;
        }
        match self.best_val_loss {
            None => true,
            Some(best) => match self.tie_break {
                TieBreak::EarliestEpoch => val_loss < best,
                TieBreak::LatestEpoch => val_loss <= best,
            },
        }
    }

    /// Record `epoch`'s validation loss and decide whether to persist
    pub fn observe(&mut self, epoch: usize, val_loss: f32) -> CheckpointDecision {
        self.epoch = epoch;
        let improved = self.is_improvement(val_loss);
        let seeded = improved && self.best_val_loss.is_none();
        if improved {
            self.best_val_loss = Some(val_loss);
            self.best_epoch = Some(epoch);
        }
        let persist = match self.policy {
            CheckpointPolicy::Best => improved,
            CheckpointPolicy::Each => true,
        };
        CheckpointDecision {
            improved,
            persist,
            seeded,
        }
    }
}
