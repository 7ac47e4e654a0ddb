//! Training module
//!
//! This module provides:
//! - The mini-batch training loop with Adam and cross-entropy
//! - Learning rate scheduling (reduce on plateau, exponential, constant)
//! - CSV history and best-model checkpoints
//! - The end-to-end experiment pipeline
//!
//! ## Pipeline
//!
//! 1. Load the image folder or the CIFAR-10 batches
//! 2. Oversample minority classes with SMOTE
//! 3. Stratified split into train, validation and test
//! 4. Fit, keeping the best model by validation accuracy
//! 5. Predict the test set and write the reports

pub mod checkpoint;
pub mod history;
pub mod scheduler;
pub mod supervised;
pub mod trainer;

// Re-export main types for convenience
pub use checkpoint::{load_checkpoint, BestCheckpoint, CheckpointMetadata};
pub use history::{EpochRecord, TrainingHistory};
pub use scheduler::{LearningRateScheduler, PlateauMode, SchedulerType};
pub use supervised::{dataset_stats, evaluate_checkpoint, prepare_data, run_experiment, RunReport};
pub use trainer::{evaluate, Evaluation, Trainer, TrainingState};

// Re-export TrainingConfig from model::config where it's defined
pub use crate::model::config::TrainingConfig;
