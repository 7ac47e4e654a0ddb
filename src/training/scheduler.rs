//! Learning rate scheduling
//!
//! - Constant
//! - Exponential decay per epoch
//! - Reduce on plateau, monitoring a validation metric

use serde::{Deserialize, Serialize};

/// Whether a larger or smaller monitored value is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlateauMode {
    Min,
    Max,
}

/// Learning rate scheduler type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerType {
    /// Constant learning rate
    Constant,

    /// Multiply the LR by `gamma` after every epoch
    Exponential { gamma: f64 },

    /// Multiply the LR by `factor` after `patience` epochs without an
    /// improvement larger than `min_delta`
    ReduceOnPlateau {
        factor: f64,
        patience: usize,
        min_delta: f64,
        min_lr: f64,
        mode: PlateauMode,
    },
}

impl Default for SchedulerType {
    fn default() -> Self {
        Self::Constant
    }
}

impl SchedulerType {
    /// Plateau schedule on validation accuracy: factor 0.3, patience 2, min_delta 0.001
    pub fn reduce_on_plateau() -> Self {
        Self::ReduceOnPlateau {
            factor: 0.3,
            patience: 2,
            min_delta: 0.001,
            min_lr: 0.0,
            mode: PlateauMode::Max,
        }
    }
}

/// Learning rate scheduler
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    scheduler_type: SchedulerType,
    base_lr: f64,
    current_lr: f64,
    current_epoch: usize,

    // ReduceOnPlateau state
    best_metric: Option<f64>,
    wait: usize,
}

impl LearningRateScheduler {
    pub fn new(scheduler_type: SchedulerType, base_lr: f64) -> Self {
        Self {
            scheduler_type,
            base_lr,
            current_lr: base_lr,
            current_epoch: 0,
            best_metric: None,
            wait: 0,
        }
    }

    /// Get the current learning rate
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Advance one epoch, feeding the monitored metric
    ///
    /// Returns `true` when the learning rate was reduced.
    pub fn step(&mut self, metric: f64) -> bool {
        self.current_epoch += 1;
        let before = self.current_lr;

        match &self.scheduler_type {
            SchedulerType::Constant => {}

            SchedulerType::Exponential { gamma } => {
                self.current_lr = self.base_lr * gamma.powi(self.current_epoch as i32);
            }

            SchedulerType::ReduceOnPlateau {
                factor,
                patience,
                min_delta,
                min_lr,
                mode,
            } => {
                let improved = match (self.best_metric, mode) {
                    (None, _) => true,
                    (Some(best), PlateauMode::Max) => metric > best + min_delta,
                    (Some(best), PlateauMode::Min) => metric < best - min_delta,
                };

                if improved {
                    self.best_metric = Some(metric);
                    self.wait = 0;
                } else {
                    self.wait += 1;
                    if self.wait >= *patience && self.current_lr > *min_lr {
                        self.current_lr = (self.current_lr * factor).max(*min_lr);
                        self.wait = 0;
                    }
                }
            }
        }

        self.current_lr < before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_scheduler() {
        let mut scheduler = LearningRateScheduler::new(SchedulerType::Constant, 0.001);
        assert!(!scheduler.step(0.5));
        assert!(!scheduler.step(0.1));
        assert_eq!(scheduler.get_lr(), 0.001);
        assert_eq!(scheduler.current_epoch(), 2);
    }

    #[test]
    fn test_exponential() {
        let mut scheduler =
            LearningRateScheduler::new(SchedulerType::Exponential { gamma: 0.9 }, 0.001);
        scheduler.step(0.0);
        assert!((scheduler.get_lr() - 0.0009).abs() < 1e-12);
        scheduler.step(0.0);
        assert!((scheduler.get_lr() - 0.00081).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut scheduler =
            LearningRateScheduler::new(SchedulerType::reduce_on_plateau(), 0.0002);

        assert!(!scheduler.step(0.50)); // best
        assert!(!scheduler.step(0.60)); // best
        assert!(!scheduler.step(0.6005)); // below min_delta, wait 1
        assert!(scheduler.step(0.59)); // wait 2 -> reduce
        assert!((scheduler.get_lr() - 0.00006).abs() < 1e-12);

        // counter restarts after a reduction
        assert!(!scheduler.step(0.59));
        assert!(scheduler.step(0.59));
        assert!((scheduler.get_lr() - 0.000018).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_improvement_resets_wait() {
        let mut scheduler =
            LearningRateScheduler::new(SchedulerType::reduce_on_plateau(), 0.01);
        scheduler.step(0.5);
        scheduler.step(0.5);
        scheduler.step(0.7);
        scheduler.step(0.7);
        assert_eq!(scheduler.get_lr(), 0.01);
    }

    #[test]
    fn test_plateau_min_mode_and_floor() {
        let mut scheduler = LearningRateScheduler::new(
            SchedulerType::ReduceOnPlateau {
                factor: 0.1,
                patience: 1,
                min_delta: 0.0,
                min_lr: 0.005,
                mode: PlateauMode::Min,
            },
            0.1,
        );
        scheduler.step(1.0);
        assert!(scheduler.step(1.0));
        assert!((scheduler.get_lr() - 0.01).abs() < 1e-12);
        assert!(scheduler.step(1.0));
        assert!((scheduler.get_lr() - 0.005).abs() < 1e-12);
        assert!(!scheduler.step(1.0));
        assert_eq!(scheduler.get_lr(), 0.005);
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_string(&SchedulerType::reduce_on_plateau()).unwrap();
        assert!(json.contains("\"type\":\"reduce_on_plateau\""));
        let back: SchedulerType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SchedulerType::reduce_on_plateau());
    }
}
