//! Best-model checkpointing
//!
//! The network is stored with `CompactRecorder` (`best_model.mpk`) next to a
//! JSON sidecar describing the epoch, its validation scores and everything
//! needed to rebuild the network for evaluation.

use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::capsnet::CapsNet;
use crate::model::config::ExperimentConfig;
use crate::{CapsNetError, Result};

/// File stem of the saved model; the recorder adds the extension
pub const MODEL_STEM: &str = "best_model";
pub const METADATA_FILE: &str = "best_model.json";

/// Sidecar written next to each saved model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub lr: f64,
    /// RFC 3339 local time of the save
    pub timestamp: String,
    pub class_names: Vec<String>,
    pub experiment: ExperimentConfig,
}

impl CheckpointMetadata {
    pub fn new(
        epoch: usize,
        val_accuracy: f64,
        val_loss: f64,
        lr: f64,
        class_names: &[String],
        experiment: &ExperimentConfig,
    ) -> Self {
        Self {
            epoch,
            val_accuracy,
            val_loss,
            lr,
            timestamp: Local::now().to_rfc3339(),
            class_names: class_names.to_vec(),
            experiment: experiment.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CapsNetError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Saves the model whenever validation accuracy improves
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    dir: PathBuf,
    best: Option<f64>,
}

impl BestCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            best: None,
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_STEM)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Best validation accuracy saved so far
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Strictly better than every earlier save
    pub fn is_improvement(&self, val_accuracy: f64) -> bool {
        self.best.map_or(true, |best| val_accuracy > best)
    }

    /// Save when `metadata.val_accuracy` improves; returns whether it did
    pub fn update<B: Backend>(
        &mut self,
        model: &CapsNet<B>,
        metadata: &CheckpointMetadata,
    ) -> Result<bool> {
        if !self.is_improvement(metadata.val_accuracy) {
            return Ok(false);
        }

        std::fs::create_dir_all(&self.dir)?;
        save_model(model, &self.model_path())?;
        metadata.save(&self.metadata_path())?;

        info!(
            "val_accuracy improved from {} to {:.5}, saving model to {:?}",
            self.best
                .map(|b| format!("{:.5}", b))
                .unwrap_or_else(|| "-inf".to_string()),
            metadata.val_accuracy,
            self.model_path()
        );
        self.best = Some(metadata.val_accuracy);
        Ok(true)
    }
}

pub fn save_model<B: Backend>(model: &CapsNet<B>, path: &Path) -> Result<()> {
    model
        .clone()
        .save_file(path, &CompactRecorder::new())
        .map_err(|e| CapsNetError::Model(format!("failed to save model to {:?}: {}", path, e)))
}

/// Rebuild the network described by the sidecar in `dir` and load its weights
pub fn load_checkpoint<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(CapsNet<B>, CheckpointMetadata)> {
    let metadata = CheckpointMetadata::load(&dir.join(METADATA_FILE))?;
    let config = metadata
        .experiment
        .model_config(metadata.class_names.len());
    let model = config.init::<B>(device)?;

    let path = dir.join(MODEL_STEM);
    let model = model
        .load_file(&path, &CompactRecorder::new(), device)
        .map_err(|e| CapsNetError::Model(format!("failed to load model from {:?}: {}", path, e)))?;

    info!(
        "Loaded checkpoint from epoch {} (val_accuracy {:.4})",
        metadata.epoch + 1,
        metadata.val_accuracy
    );
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ExperimentConfig;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn class_names() -> Vec<String> {
        (0..10).map(|i| format!("class_{}", i)).collect()
    }

    #[test]
    fn test_improvement_is_strict() {
        let mut checkpoint = BestCheckpoint::new("unused");
        assert!(checkpoint.is_improvement(0.0));
        checkpoint.best = Some(0.5);
        assert!(!checkpoint.is_improvement(0.5));
        assert!(checkpoint.is_improvement(0.51));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let experiment = ExperimentConfig::vgg_cifar10();
        let model = experiment
            .model_config(10)
            .init::<TestBackend>(&device)
            .unwrap();

        let mut checkpoint = BestCheckpoint::new(dir.path());
        let first = CheckpointMetadata::new(0, 0.4, 1.2, 2e-4, &class_names(), &experiment);
        assert!(checkpoint.update(&model, &first).unwrap());

        let worse = CheckpointMetadata::new(1, 0.3, 1.4, 2e-4, &class_names(), &experiment);
        assert!(!checkpoint.update(&model, &worse).unwrap());
        assert_eq!(checkpoint.best(), Some(0.4));

        let (loaded, metadata) = load_checkpoint::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(metadata.epoch, 0);
        assert_eq!(metadata.class_names.len(), 10);
        assert_eq!(loaded.num_classes(), 10);
        assert_eq!(loaded.num_params(), model.num_params());
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let result = load_checkpoint::<TestBackend>(dir.path(), &Default::default());
        assert!(matches!(result, Err(CapsNetError::PathNotFound(_))));
    }
}
