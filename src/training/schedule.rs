//! Learning rate scheduling
//!
//! The warmup+cosine controller used by the warm stage. Reduce-on-plateau
//! is a per-epoch policy rather than a schedule; only one of the two
//! drives the learning rate in any stage.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Linear warmup followed by cosine decay to a floor.
///
/// For `epoch < warmup_epochs` the rate ramps linearly:
/// `base_lr * (epoch + 1) / warmup_epochs`. Afterwards it follows
/// `min_lr + (base_lr - min_lr) * 0.5 * (1 + cos(pi * progress))` with
/// `progress = (epoch - warmup) / (total - warmup)` clamped to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupCosineSchedule {
    base_lr: f64,
    min_lr: f64,
    warmup_epochs: usize,
    total_epochs: usize,
}

impl WarmupCosineSchedule {
    /// Create a schedule over the given epoch budget
    pub fn new(base_lr: f64, min_lr: f64, warmup_epochs: usize, total_epochs: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            warmup_epochs,
            total_epochs,
        }
    }

    /// Learning rate for a zero-indexed epoch
    pub fn lr_at(&self, epoch: usize) -> f64 {
        if self.warmup_epochs > 0 && epoch < self.warmup_epochs {
            return self.base_lr * (epoch + 1) as f64 / self.warmup_epochs as f64;
        }

        let decay_span = self.total_epochs.saturating_sub(self.warmup_epochs);
        if decay_span == 0 {
            return self.base_lr;
        }

        let progress = (epoch - self.warmup_epochs) as f64 / decay_span as f64;
        let progress = progress.clamp(0.0, 1.0);
        self.min_lr + (self.base_lr - self.min_lr) * 0.5 * (1.0 + (PI * progress).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_values() {
        // base=1e-4, min=1e-7, total=30, warmup=3
        let schedule = WarmupCosineSchedule::new(1e-4, 1e-7, 3, 30);

        assert!((schedule.lr_at(0) - 1e-4 / 3.0).abs() < 1e-12);
        assert!((schedule.lr_at(2) - 1e-4).abs() < 1e-12);
        // progress = 0 right after warmup
        assert!((schedule.lr_at(3) - 1e-4).abs() < 1e-12);
        // near the end of the budget the rate has decayed to the floor's
        // order of magnitude
        assert!(schedule.lr_at(29) < 1e-6);
        assert!(schedule.lr_at(29) >= 1e-7);
    }

    #[test]
    fn test_warmup_is_monotonically_increasing() {
        let schedule = WarmupCosineSchedule::new(1e-3, 1e-6, 5, 20);
        for epoch in 1..5 {
            assert!(schedule.lr_at(epoch) > schedule.lr_at(epoch - 1));
        }
    }

    #[test]
    fn test_decay_is_monotonically_decreasing() {
        let schedule = WarmupCosineSchedule::new(1e-3, 1e-6, 5, 20);
        for epoch in 6..20 {
            assert!(schedule.lr_at(epoch) < schedule.lr_at(epoch - 1));
        }
    }

    #[test]
    fn test_progress_clamped_past_budget() {
        let schedule = WarmupCosineSchedule::new(1e-3, 1e-6, 2, 10);
        assert!((schedule.lr_at(10) - 1e-6).abs() < 1e-12);
        assert!((schedule.lr_at(50) - 1e-6).abs() < 1e-12);
    }

    #[test]
    fn test_no_warmup() {
        let schedule = WarmupCosineSchedule::new(1e-3, 0.0, 0, 10);
        assert!((schedule.lr_at(0) - 1e-3).abs() < 1e-12);
        assert!(schedule.lr_at(5) < 1e-3);
    }
}
