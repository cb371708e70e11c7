//! Learning-rate schedule.

use crate::config::TrainConfig;
use std::f64::consts::PI;

/// Linear warmup followed by cosine decay to `base_lr * min_ratio`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CosineSchedule {
    pub base_lr: f64,
    pub warmup_steps: usize,
    pub total_steps: usize,
    pub min_ratio: f64,
}

impl CosineSchedule {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize, min_ratio: f64) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
            min_ratio: min_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(
            config.learning_rate,
            config.warmup_steps,
            config.epochs * config.steps_per_epoch,
            config.min_lr_ratio,
        )
    }

    /// Learning rate for optimizer step `step` (0-based).
    pub fn lr(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * (step + 1) as f64 / self.warmup_steps as f64;
        }
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1);
        let progress = ((step - self.warmup_steps) as f64 / decay_steps as f64).min(1.0);
        let min_lr = self.base_lr * self.min_ratio;
        min_lr + (self.base_lr - min_lr) * 0.5 * (1.0 + (PI * progress).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_is_linear() {
        let s = CosineSchedule::new(1e-3, 10, 100, 0.1);
        assert!((s.lr(0) - 1e-4).abs() < 1e-12);
        assert!((s.lr(4) - 5e-4).abs() < 1e-12);
        assert!((s.lr(9) - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_decays_to_floor() {
        let s = CosineSchedule::new(1e-3, 10, 100, 0.1);
        assert!((s.lr(10) - 1e-3).abs() < 1e-12);
        assert!((s.lr(55) - 5.5e-4).abs() < 1e-9);
        assert!((s.lr(100) - 1e-4).abs() < 1e-12);
        assert!((s.lr(10_000) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_after_warmup() {
        let s = CosineSchedule::new(3e-4, 5, 50, 0.0);
        let lrs: Vec<f64> = (5..60).map(|t| s.lr(t)).collect();
        assert!(lrs.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_no_warmup() {
        let s = CosineSchedule::new(1.0, 0, 0, 0.5);
        assert_eq!(s.lr(0), 1.0);
        assert!((s.lr(1) - 0.5).abs() < 1e-12);
    }
}
