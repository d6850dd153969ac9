//! Per-epoch training policies
//!
//! An explicit ordered list of policy objects replaces implicit lifecycle
//! callbacks: the scheduler invokes each policy at the end of every epoch
//! and executes the returned actions itself. Policies never mutate shared
//! state directly.

use tracing::{debug, info, warn};

/// Validation and training metrics observed at the end of an epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochObservation {
    /// Zero-indexed epoch within the stage
    pub epoch: usize,
    /// Mean training loss over the epoch
    pub train_loss: f64,
    /// Training accuracy over the epoch
    pub train_accuracy: f64,
    /// Validation loss
    pub val_loss: f64,
    /// Validation accuracy
    pub val_accuracy: f64,
    /// Learning rate used during the epoch
    pub learning_rate: f64,
}

/// Action requested by a policy, executed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PolicyAction {
    /// Nothing to do
    Continue,
    /// Persist the current model state
    Checkpoint,
    /// Terminate the stage after this epoch
    Stop,
    /// Rebind the optimizer learning rate
    AdjustLr(f64),
}

/// A policy consulted once per epoch
pub trait EpochPolicy {
    /// Identifier used in logs
    fn name(&self) -> &'static str;

    /// Observe the epoch and request an action
    fn on_epoch_end(&mut self, obs: &EpochObservation) -> PolicyAction;
}

/// Requests a checkpoint whenever the monitored validation accuracy
/// strictly exceeds every prior epoch of the run.
pub struct CheckpointOnImprove {
    best_accuracy: f64,
}

impl CheckpointOnImprove {
    /// Start with no recorded best
    pub fn new() -> Self {
        Self {
            best_accuracy: f64::NEG_INFINITY,
        }
    }

    /// Resume monitoring from a previous stage's best value
    pub fn resume_from(best_accuracy: f64) -> Self {
        Self { best_accuracy }
    }

    /// Best value seen so far
    pub fn best(&self) -> f64 {
        self.best_accuracy
    }
}

impl Default for CheckpointOnImprove {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochPolicy for CheckpointOnImprove {
    fn name(&self) -> &'static str {
        "checkpoint-on-improve"
    }

    fn on_epoch_end(&mut self, obs: &EpochObservation) -> PolicyAction {
        if obs.val_accuracy > self.best_accuracy {
            info!(
                "Validation accuracy improved: {:.2}% -> {:.2}%",
                self.best_accuracy.max(0.0) * 100.0,
                obs.val_accuracy * 100.0
            );
            self.best_accuracy = obs.val_accuracy;
            PolicyAction::Checkpoint
        } else {
            PolicyAction::Continue
        }
    }
}

/// Stops the stage after `patience` consecutive epochs without validation
/// loss improvement.
pub struct EarlyStopOnPlateau {
    patience: usize,
    best_loss: f64,
    stale_epochs: usize,
}

impl EarlyStopOnPlateau {
    /// Create with the given patience window
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            stale_epochs: 0,
        }
    }
}

impl EpochPolicy for EarlyStopOnPlateau {
    fn name(&self) -> &'static str {
        "early-stop-on-plateau"
    }

    fn on_epoch_end(&mut self, obs: &EpochObservation) -> PolicyAction {
        if obs.val_loss < self.best_loss {
            self.best_loss = obs.val_loss;
            self.stale_epochs = 0;
            return PolicyAction::Continue;
        }

        self.stale_epochs += 1;
        debug!(
            "No val-loss improvement for {}/{} epochs",
            self.stale_epochs, self.patience
        );

        if self.stale_epochs >= self.patience {
            warn!(
                "Early stopping after {} epochs without improvement",
                self.patience
            );
            PolicyAction::Stop
        } else {
            PolicyAction::Continue
        }
    }
}

/// Multiplies the learning rate by a fixed factor after a shorter
/// plateau window, never dropping below the configured floor.
pub struct ReduceLrOnPlateau {
    patience: usize,
    factor: f64,
    min_lr: f64,
    current_lr: f64,
    best_loss: f64,
    stale_epochs: usize,
}

impl ReduceLrOnPlateau {
    /// Create with an initial rate, reduction factor, window, and floor
    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            patience,
            factor,
            min_lr,
            current_lr: initial_lr,
            best_loss: f64::INFINITY,
            stale_epochs: 0,
        }
    }
}

impl EpochPolicy for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        "reduce-lr-on-plateau"
    }

    fn on_epoch_end(&mut self, obs: &EpochObservation) -> PolicyAction {
        if obs.val_loss < self.best_loss {
            self.best_loss = obs.val_loss;
            self.stale_epochs = 0;
            return PolicyAction::Continue;
        }

        self.stale_epochs += 1;
        if self.stale_epochs < self.patience {
            return PolicyAction::Continue;
        }

        self.stale_epochs = 0;
        let reduced = (self.current_lr * self.factor).max(self.min_lr);
        if reduced >= self.current_lr {
            return PolicyAction::Continue;
        }

        info!(
            "Reducing learning rate: {:.6e} -> {:.6e}",
            self.current_lr, reduced
        );
        self.current_lr = reduced;
        PolicyAction::AdjustLr(reduced)
    }
}
