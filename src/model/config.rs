//! Experiment configuration
//!
//! Defines the data source, network, oversampling, split and training
//! settings of one experiment, plus the two ready-made presets.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::folder::{ClassIntensity, FolderLoadOptions};
use crate::dataset::oversample::{SamplingStrategy, Smote};
use crate::dataset::split::SplitConfig;
use crate::model::backbone::BackboneKind;
use crate::model::capsnet::CapsNetConfig;
use crate::training::scheduler::SchedulerType;
use crate::{CapsNetError, Result};

/// Where the images come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    /// One sub-directory per class
    ImageFolder {
        root: PathBuf,
        #[serde(default = "default_extensions")]
        extensions: Vec<String>,
        #[serde(default)]
        class_intensity: ClassIntensity,
    },
    /// CIFAR-10 binary batches; validation is carved from the training batches
    Cifar10 {
        root: PathBuf,
        validation_fraction: f64,
    },
}

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string()]
}

/// Capsule head hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleSettings {
    pub capsules_per_position: usize,
    pub capsule_dim: usize,
    pub routed_dim: usize,
    pub hidden_units: usize,
    pub routings: usize,
    pub bn_momentum: f64,
}

impl Default for CapsuleSettings {
    fn default() -> Self {
        Self {
            capsules_per_position: 32,
            capsule_dim: 8,
            routed_dim: 160,
            hidden_units: 32,
            routings: 3,
            bn_momentum: 0.2,
        }
    }
}

/// SMOTE settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OversampleConfig {
    pub strategy: SamplingStrategy,
    pub k_neighbors: usize,
    pub seed: u64,
}

impl OversampleConfig {
    pub fn smote(&self) -> Smote {
        Smote::new(self.k_neighbors, self.seed)
    }
}

/// Optimizer and loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Batch size used for validation and test predictions
    pub eval_batch_size: usize,
    pub learning_rate: f64,
    /// Adam first-moment decay
    pub beta_1: f32,
    /// Adam second-moment decay
    pub beta_2: f32,
    pub epsilon: f32,
    pub scheduler: SchedulerType,
    /// Stop after this many epochs without a better validation accuracy
    pub early_stopping_patience: Option<usize>,
    /// Seed for per-epoch shuffling
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 100,
            eval_batch_size: 100,
            learning_rate: 0.0002,
            beta_1: 0.5,
            beta_2: 0.999,
            epsilon: 1e-7,
            scheduler: SchedulerType::reduce_on_plateau(),
            early_stopping_patience: None,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Tiny run for smoke tests
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 4,
            eval_batch_size: 4,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(CapsNetError::Config("epochs must be greater than 0".into()));
        }
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(CapsNetError::Config("batch sizes must be greater than 0".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(CapsNetError::Config("learning_rate must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.beta_1) || !(0.0..1.0).contains(&self.beta_2) {
            return Err(CapsNetError::Config("Adam betas must be in [0, 1)".into()));
        }
        Ok(())
    }
}

/// Everything needed to run one experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub source: DataSource,
    pub backbone: BackboneKind,
    pub image_size: usize,
    /// Burn record with pretrained backbone parameters
    #[serde(default)]
    pub backbone_weights: Option<PathBuf>,
    #[serde(default)]
    pub capsules: CapsuleSettings,
    pub oversample: Option<OversampleConfig>,
    pub split: SplitConfig,
    pub training: TrainingConfig,
    /// Directory receiving log.csv, checkpoints, charts and reports
    pub output_dir: PathBuf,
}

/// Built-in experiment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// InceptionV3 on a 21-class image folder with SMOTE
    InceptionImages,
    /// VGG16 on CIFAR-10
    VggCifar10,
}

impl Preset {
    pub fn config(&self) -> ExperimentConfig {
        match self {
            Preset::InceptionImages => ExperimentConfig::inception_images(),
            Preset::VggCifar10 => ExperimentConfig::vgg_cifar10(),
        }
    }
}

impl ExperimentConfig {
    /// InceptionV3 + capsules on `images/` at 75px, SMOTE, 70/10/20 split
    pub fn inception_images() -> Self {
        Self {
            name: "inception_capsnet".to_string(),
            source: DataSource::ImageFolder {
                root: PathBuf::from("images"),
                extensions: default_extensions(),
                class_intensity: ClassIntensity::None,
            },
            backbone: BackboneKind::InceptionV3,
            image_size: 75,
            backbone_weights: None,
            capsules: CapsuleSettings::default(),
            oversample: Some(OversampleConfig {
                strategy: SamplingStrategy::image_folder_table(),
                k_neighbors: 5,
                seed: 42,
            }),
            split: SplitConfig::default(),
            training: TrainingConfig::default(),
            output_dir: PathBuf::from("result"),
        }
    }

    /// VGG16 + capsules on CIFAR-10 at 32px, no oversampling
    pub fn vgg_cifar10() -> Self {
        Self {
            name: "vgg_cifar10".to_string(),
            source: DataSource::Cifar10 {
                root: PathBuf::from("data/cifar-10-batches-bin"),
                validation_fraction: 0.1,
            },
            backbone: BackboneKind::Vgg16,
            image_size: 32,
            backbone_weights: None,
            capsules: CapsuleSettings::default(),
            oversample: None,
            split: SplitConfig::default(),
            training: TrainingConfig::default(),
            output_dir: PathBuf::from("result"),
        }
    }

    /// Network configuration for `num_classes` classes
    pub fn model_config(&self, num_classes: usize) -> CapsNetConfig {
        let caps = &self.capsules;
        CapsNetConfig::new(self.backbone, num_classes, self.image_size)
            .with_capsules_per_position(caps.capsules_per_position)
            .with_capsule_dim(caps.capsule_dim)
            .with_routed_dim(caps.routed_dim)
            .with_hidden_units(caps.hidden_units)
            .with_routings(caps.routings)
            .with_bn_momentum(caps.bn_momentum)
    }

    /// Decode options for an image-folder source
    pub fn folder_options(&self) -> Option<FolderLoadOptions> {
        match &self.source {
            DataSource::ImageFolder {
                extensions,
                class_intensity,
                ..
            } => Some(FolderLoadOptions {
                image_size: self.image_size,
                extensions: extensions.clone(),
                class_intensity: *class_intensity,
            }),
            DataSource::Cifar10 { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.split.validate()?;

        if self.image_size < self.backbone.min_input_size() {
            return Err(CapsNetError::Config(format!(
                "{} needs images of at least {}px, got {}px",
                self.backbone,
                self.backbone.min_input_size(),
                self.image_size
            )));
        }
        if self.capsules.routings == 0 {
            return Err(CapsNetError::Config("routings must be at least 1".into()));
        }
        if self.capsules.capsule_dim == 0 || self.capsules.capsules_per_position == 0 {
            return Err(CapsNetError::Config("capsule sizes must be positive".into()));
        }

        match &self.source {
            DataSource::ImageFolder { extensions, .. } => {
                if extensions.is_empty() {
                    return Err(CapsNetError::Config("no image extensions given".into()));
                }
            }
            DataSource::Cifar10 {
                validation_fraction,
                ..
            } => {
                if !(*validation_fraction > 0.0 && *validation_fraction < 1.0) {
                    return Err(CapsNetError::Config(format!(
                        "validation_fraction must be in (0, 1), got {}",
                        validation_fraction
                    )));
                }
                if self.image_size != crate::dataset::cifar10::IMAGE_SIZE {
                    return Err(CapsNetError::Config(format!(
                        "CIFAR-10 images are {}px, got image_size {}",
                        crate::dataset::cifar10::IMAGE_SIZE,
                        self.image_size
                    )));
                }
                if self.oversample.is_some() {
                    tracing::warn!("Oversampling a balanced CIFAR-10 training set");
                }
            }
        }

        if let Some(oversample) = &self.oversample {
            if oversample.k_neighbors == 0 {
                return Err(CapsNetError::Config("k_neighbors must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CapsNetError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_presets_are_valid() {
        ExperimentConfig::inception_images().validate().unwrap();
        ExperimentConfig::vgg_cifar10().validate().unwrap();
    }

    #[test]
    fn test_inception_preset_values() {
        let config = ExperimentConfig::inception_images();
        assert_eq!(config.image_size, 75);
        assert_eq!(config.training.batch_size, 100);
        assert_eq!(config.training.epochs, 50);
        assert!((config.training.learning_rate - 0.0002).abs() < 1e-12);
        assert_eq!(config.split.seed, 2);
        let oversample = config.oversample.unwrap();
        assert_eq!(oversample.strategy.targets.len(), 21);
    }

    #[test]
    fn test_model_config_carries_capsule_settings() {
        let mut config = ExperimentConfig::vgg_cifar10();
        config.capsules.routings = 5;
        let model = config.model_config(10);
        assert_eq!(model.routings, 5);
        assert_eq!(model.num_classes, 10);
        assert_eq!(model.backbone, BackboneKind::Vgg16);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ExperimentConfig::inception_images();
        config.image_size = 64;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::vgg_cifar10();
        config.training.epochs = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::vgg_cifar10();
        config.image_size = 64;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::vgg_cifar10();
        config.capsules.routings = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::inception_images();
        config.split.held_out_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiment.json");

        let config = ExperimentConfig::inception_images();
        config.save(&path).unwrap();
        let loaded = ExperimentConfig::load(&path).unwrap();

        assert_eq!(loaded.name, config.name);
        assert_eq!(loaded.backbone, BackboneKind::InceptionV3);
        assert_eq!(
            loaded.oversample.unwrap().strategy,
            SamplingStrategy::image_folder_table()
        );
    }

    #[test]
    fn test_folder_options_only_for_folders() {
        assert!(ExperimentConfig::vgg_cifar10().folder_options().is_none());
        let options = ExperimentConfig::inception_images().folder_options().unwrap();
        assert_eq!(options.image_size, 75);
        assert_eq!(options.extensions, vec!["jpg"]);
    }
}
