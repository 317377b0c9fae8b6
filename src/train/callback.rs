//! Hooks into the training loop
//!
//! Callbacks observe the loop; they cannot change weights. A callback may
//! ask the run to stop, which takes effect after the current epoch's
//! checkpoint decision so an epoch is never cut short.
//!
//! ```rust
//! use nervus::train::{CallbackAction, CallbackContext, TrainerCallback};
//!
//! struct StopAfterThree;
//!
//! impl TrainerCallback for StopAfterThree {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
//!         if ctx.epoch >= 3 {
//!             CallbackAction::Stop
//!         } else {
//!             CallbackAction::Continue
//!         }
//!     }
//! }
//! ```

/// Snapshot of the run passed to every hook
#[derive(Clone, Debug, Default)]
pub struct CallbackContext {
    /// 1-based; 0 before the first epoch
    pub epoch: usize,
    pub max_epochs: usize,
    /// Batch within the epoch, 1-based
    pub step: usize,
    pub steps_per_epoch: usize,
    /// Latest batch loss during an epoch, epoch train loss at its end
    pub loss: f32,
    pub val_loss: Option<f32>,
    pub best_val_loss: Option<f32>,
    /// This epoch beat the best val loss of an earlier epoch
    pub updated: bool,
    pub elapsed_secs: f64,
}

/// What the loop does after an epoch-level hook
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// Finish the run after the current epoch
    Stop,
}

/// Training event hooks; every method defaults to a no-op
pub trait TrainerCallback: Send {
    fn on_train_begin(&mut self, _ctx: &CallbackContext) {}

    fn on_train_end(&mut self, _ctx: &CallbackContext) {}

    fn on_epoch_begin(&mut self, _ctx: &CallbackContext) {}

    /// Called after validation and the checkpoint decision
    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_step_end(&mut self, _ctx: &CallbackContext) {}

    fn name(&self) -> &str {
        "TrainerCallback"
    }
}

/// Logs one line per epoch
///
/// `epoch [  2/10 ], train_loss: 0.6931, val_loss: 0.6920   Updated val_loss!`
#[derive(Clone, Debug, Default)]
pub struct ProgressCallback {
    /// Also log every n-th batch at debug level; 0 disables
    pub log_interval: usize,
}

impl ProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self { log_interval }
    }

    pub fn format_epoch(ctx: &CallbackContext) -> String {
        let width = ctx.max_epochs.to_string().len().max(3);
        let mut line = format!(
            "epoch [{:>width$}/{:<width$}], train_loss: {:.4}, val_loss: {:.4}",
            ctx.epoch,
            ctx.max_epochs,
            ctx.loss,
            ctx.val_loss.unwrap_or(f32::NAN),
        );
        if ctx.updated {
            line.push_str("   Updated val_loss!");
        }
        line
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_train_begin(&mut self, ctx: &CallbackContext) {
        tracing::info!(epochs = ctx.max_epochs, "Training started");
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        tracing::info!("{}", Self::format_epoch(ctx));
        CallbackAction::Continue
    }

    fn on_step_end(&mut self, ctx: &CallbackContext) {
        if self.log_interval > 0 && ctx.step % self.log_interval == 0 {
            tracing::debug!(
                epoch = ctx.epoch,
                step = ctx.step,
                steps = ctx.steps_per_epoch,
                loss = ctx.loss,
                "batch"
            );
        }
    }

    fn on_train_end(&mut self, ctx: &CallbackContext) {
        tracing::info!(
            best_val_loss = ctx.best_val_loss.unwrap_or(f32::NAN),
            elapsed_secs = ctx.elapsed_secs,
            "Training finished"
        );
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

/// Dispatches events to callbacks in registration order
#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn on_train_begin(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_train_begin(ctx);
        }
    }

    pub fn on_train_end(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_train_end(ctx);
        }
    }

    pub fn on_epoch_begin(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_epoch_begin(ctx);
        }
    }

    /// Every callback sees the event; any `Stop` wins
    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        let mut action = CallbackAction::Continue;
        for cb in &mut self.callbacks {
            if cb.on_epoch_end(ctx) == CallbackAction::Stop {
                tracing::info!(callback = cb.name(), "stop requested");
                action = CallbackAction::Stop;
            }
        }
        action
    }

    pub fn on_step_end(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_step_end(ctx);
        }
    }
}
