//! Training run reports
//!
//! Per-stage epoch histories and the final run record. The training report
//! is written exactly once, when the run reaches its terminal successful
//! state, and never mutated afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metrics recorded for one epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// History and terminal metrics of one training stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage identifier ("warm" or "fine_tune")
    pub stage: String,
    /// Epochs actually run (may be short of the budget on early stop)
    pub epochs_run: usize,
    /// Wall time for the stage in seconds
    pub duration_secs: f64,
    /// Per-epoch metric history
    pub history: Vec<EpochRecord>,
    /// Best validation accuracy observed during the stage
    pub best_val_accuracy: f64,
    /// Whether the stage terminated through the plateau policy
    pub early_stopped: bool,
    /// Test accuracy measured once after the stage completed
    pub test_accuracy: f64,
}

impl StageReport {
    /// Epoch with the highest validation accuracy, if any epoch ran
    pub fn best_epoch(&self) -> Option<usize> {
        self.history
            .iter()
            .max_by(|a, b| a.val_accuracy.partial_cmp(&b.val_accuracy).unwrap())
            .map(|r| r.epoch)
    }
}

/// Final persisted record of a training run. Produced once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Number of classes trained over
    pub num_classes: usize,
    /// Input resolution
    pub image_size: usize,
    /// Batch size
    pub batch_size: usize,
    /// Run seed
    pub seed: u64,
    /// One report per completed stage, in execution order
    pub stages: Vec<StageReport>,
    /// Whether the fine-tune stage ran
    pub fine_tuned: bool,
    /// Whether class weights rebalanced the loss
    pub class_weights_used: bool,
    /// Label smoothing factor used
    pub label_smoothing: f32,
    /// Whether warmup+cosine decay drove the warm stage
    pub cosine_decay: bool,
    /// Whether reduced precision was requested
    pub mixed_precision: bool,
    /// Best validation accuracy across the whole run
    pub best_val_accuracy: f64,
    /// Test accuracy of the final model
    pub test_accuracy: f64,
    /// Total wall time in seconds
    pub total_duration_secs: f64,
    /// RFC 3339 completion timestamp
    pub timestamp: String,
}

impl TrainingReport {
    /// Epochs run in the warm stage
    pub fn stage1_epochs(&self) -> usize {
        self.stages.first().map(|s| s.epochs_run).unwrap_or(0)
    }

    /// Epochs run in the fine-tune stage, if it ran
    pub fn stage2_epochs(&self) -> Option<usize> {
        self.stages.get(1).map(|s| s.epochs_run)
    }

    /// Write the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously written report
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
