//! Training loop with validation and checkpoint selection

use super::callback::{CallbackAction, CallbackContext, CallbackManager, TrainerCallback};
use super::checkpoint::CheckpointSink;
use super::history::{EpochLosses, LossAccumulator, LossHistory, SplitLoss};
use super::state::{CheckpointPolicy, RunState, TieBreak, TrainingState};
use crate::autograd::backward;
use crate::data::{Batch, DataLoader};
use crate::io::{Checkpoint, CheckpointMetadata};
use crate::network::ComposedModel;
use crate::optim::{clip_grad_norm, Optimizer};
use crate::task::TaskStrategy;
use crate::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

/// Loop settings that do not belong to the model or the data
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub policy: CheckpointPolicy,
    pub tie_break: TieBreak,
    /// Clip the global gradient norm (None = no clipping)
    pub max_grad_norm: Option<f32>,
    /// Debug-log every n-th batch; 0 disables
    pub log_interval: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            policy: CheckpointPolicy::Best,
            tie_break: TieBreak::EarliestEpoch,
            max_grad_norm: None,
            log_interval: 0,
        }
    }
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainResult {
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f32>,
    pub history: LossHistory,
    /// Files written, in write order; "best" may repeat a path
    pub checkpoints: Vec<PathBuf>,
    pub stopped_early: bool,
    pub elapsed_secs: f64,
}

/// Owns the model for the duration of a run
///
/// Epochs run strictly in sequence: train over every batch, then a
/// forward-only validation pass, then the checkpoint decision.
pub struct Trainer {
    model: ComposedModel,
    strategy: TaskStrategy,
    optimizer: Box<dyn Optimizer>,
    config: TrainerConfig,
    callbacks: CallbackManager,
    state: TrainingState,
    run: RunState,
    history: LossHistory,
    annotations: BTreeMap<String, serde_json::Value>,
}

impl Trainer {
    pub fn new(
        model: ComposedModel,
        strategy: TaskStrategy,
        optimizer: Box<dyn Optimizer>,
        config: TrainerConfig,
    ) -> Self {
        let labels = model.task().labels.iter().map(|l| l.name.clone()).collect();
        let run = RunState::new(config.policy, config.tie_break);
        Self {
            model,
            strategy,
            optimizer,
            config,
            callbacks: CallbackManager::new(),
            state: TrainingState::Initializing,
            run,
            history: LossHistory::new(labels),
            annotations: BTreeMap::new(),
        }
    }

    /// Extra field copied into every checkpoint's metadata
    pub fn annotate(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.annotations.insert(key.into(), value);
    }

    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    pub fn model(&self) -> &ComposedModel {
        &self.model
    }

    /// Hand back the trained model
    pub fn into_model(self) -> ComposedModel {
        self.model
    }

    /// Forward, loss, backward and one optimizer update; returns per-head losses
    pub fn train_step(&mut self, batch: &Batch) -> Result<Vec<f32>> {
        let outputs = self.model.forward(&batch.input())?;
        let mut loss = self
            .strategy
            .loss(self.model.task(), &outputs, &batch.targets)?;

        self.optimizer.zero_grad(self.model.parameters_mut());
        backward(&mut loss.total, None);
        if let Some(max_norm) = self.config.max_grad_norm {
            clip_grad_norm(self.model.parameters_mut(), max_norm);
        }
        self.optimizer.step(self.model.parameters_mut());

        Ok(loss.per_head)
    }

    /// Forward-only loss of one batch
    pub fn eval_step(&self, batch: &Batch) -> Result<Vec<f32>> {
        let outputs = self.model.forward(&batch.input())?;
        Ok(self
            .strategy
            .loss(self.model.task(), &outputs, &batch.targets)?
            .per_head)
    }

    /// Size-weighted loss over every batch of `loader`
    pub fn evaluate_loss(&self, loader: &DataLoader, epoch: usize) -> Result<SplitLoss> {
        let mut acc = LossAccumulator::new(self.model.num_heads());
        for batch in loader.epoch(epoch) {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            acc.add(&self.eval_step(&batch)?, batch.len());
        }
        Ok(acc.finish())
    }

    fn context(&self, epoch: usize, started: Instant) -> CallbackContext {
        CallbackContext {
            epoch,
            max_epochs: self.config.epochs,
            best_val_loss: self.run.best_val_loss,
            elapsed_secs: started.elapsed().as_secs_f64(),
            ..Default::default()
        }
    }

    fn checkpoint_metadata(&self) -> CheckpointMetadata {
        let mut metadata =
            CheckpointMetadata::new(self.model.spec().clone(), self.strategy.criterion().name())
                .with_custom("optimizer", serde_json::json!(self.optimizer.name()))
                .with_custom("lr", serde_json::json!(self.optimizer.lr()))
                .with_custom("policy", serde_json::json!(self.config.policy.to_string()));
        metadata
            .custom
            .extend(self.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        metadata
    }

    /// Run every epoch, persisting checkpoints through `sink`
    pub fn train(
        &mut self,
        train: &DataLoader,
        val: &DataLoader,
        sink: &mut dyn CheckpointSink,
    ) -> Result<TrainResult> {
        self.state = TrainingState::Initializing;
        let started = Instant::now();
        let heads = self.model.num_heads();
        let mut checkpoints = Vec::new();
        let mut stopped_early = false;
        let mut epochs_run = 0;

        let ctx = self.context(0, started);
        self.callbacks.on_train_begin(&ctx);

        for epoch in 1..=self.config.epochs {
            self.state = TrainingState::TrainingEpoch(epoch);
            let ctx = self.context(epoch, started);
            self.callbacks.on_epoch_begin(&ctx);

            let steps_per_epoch = train.plan(epoch).len();
            let mut acc = LossAccumulator::new(heads);
            for (step, batch) in train.epoch(epoch).enumerate() {
                let batch = batch?;
                if batch.is_empty() {
                    continue;
                }
                let per_head = self.train_step(&batch)?;
                acc.add(&per_head, batch.len());

                let ctx = CallbackContext {
                    step: step + 1,
                    steps_per_epoch,
                    loss: per_head.iter().sum(),
                    ..self.context(epoch, started)
                };
                self.callbacks.on_step_end(&ctx);
            }
            let train_loss = acc.finish();

            self.state = TrainingState::Validating(epoch);
            let val_loss = self.evaluate_loss(val, epoch)?;

            self.state = TrainingState::CheckpointDecision(epoch);
            let decision = self.run.observe(epoch, val_loss.total);
            if decision.persist {
                let checkpoint = Checkpoint::from_model(
                    &self.model,
                    self.checkpoint_metadata()
                        .at_epoch(epoch, train_loss.total, val_loss.total),
                );
                let path = sink.persist(self.config.policy, epoch, &checkpoint)?;
                tracing::debug!(epoch, path = %path.display(), "checkpoint saved");
                checkpoints.push(path);
            }

            let ctx = CallbackContext {
                loss: train_loss.total,
                val_loss: Some(val_loss.total),
                updated: decision.updated(),
                ..self.context(epoch, started)
            };
            self.history.push(EpochLosses {
                epoch,
                train: train_loss,
                val: val_loss,
            });
            sink.record_epoch(&self.history)?;
            epochs_run = epoch;

            if self.callbacks.on_epoch_end(&ctx) == CallbackAction::Stop {
                stopped_early = epoch < self.config.epochs;
                break;
            }
        }

        self.state = TrainingState::Finalizing;
        let ctx = self.context(epochs_run, started);
        self.callbacks.on_train_end(&ctx);

        Ok(TrainResult {
            epochs_run,
            best_epoch: self.run.best_epoch,
            best_val_loss: self.run.best_val_loss,
            history: self.history.clone(),
            checkpoints,
            stopped_early,
            elapsed_secs: ctx.elapsed_secs,
        })
    }
}
