//! # CapsNet Transfer
//!
//! Transfer-learning image classifiers with a capsule-routing head, built on
//! the Burn framework.
//!
//! ## Features
//!
//! - **Backbones**: VGG16 and InceptionV3 feature extractors
//! - **Capsule head**: squashed primary capsules, conditional PReLU gating and
//!   multiplicative routing
//! - **Class balancing**: SMOTE oversampling towards per-class targets
//! - **Reports**: confusion matrix, per-class metrics table and SVG training curves
//!
//! ## Modules
//!
//! - `dataset`: image-folder and CIFAR-10 loading, SMOTE, stratified splits
//! - `model`: backbones, capsule head and experiment configuration
//! - `training`: training loop, scheduler, history, checkpoints and pipeline
//! - `utils`: errors, logging, metrics and charts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use capsnet_transfer::backend::{default_device, TrainingBackend};
//! use capsnet_transfer::model::config::ExperimentConfig;
//! use capsnet_transfer::training::run_experiment;
//!
//! let config = ExperimentConfig::vgg_cifar10();
//! let report = run_experiment::<TrainingBackend>(&config, default_device())?;
//! println!("Test accuracy: {:.4}", report.metrics.accuracy);
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{ImageBatch, ImageBatcher, ImageFolder, ImageItem, ImageSet, InMemoryDataset};
pub use dataset::{SamplingStrategy, Smote, SplitConfig};
pub use model::{BackboneKind, CapsNet, CapsNetConfig, ExperimentConfig, Preset};
pub use training::{run_experiment, Trainer, TrainingConfig, TrainingHistory};
pub use utils::error::{CapsNetError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
