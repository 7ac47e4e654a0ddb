//! Backbone plus capsule head
//!
//! `CapsNet` runs a convolutional backbone (VGG16 or InceptionV3) and feeds
//! its feature map to the capsule-routing head. The head's input width
//! depends on the backbone's spatial output, which is derived from the
//! input image size when the network is built.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::model::backbone::{Backbone, BackboneKind};
use crate::model::capsule::{CapsuleHead, CapsuleHeadConfig};
use crate::CapsNetError;

/// Configuration of the full network
#[derive(Config, Debug)]
pub struct CapsNetConfig {
    pub backbone: BackboneKind,
    pub num_classes: usize,
    /// Side length of the square input images
    pub image_size: usize,
    #[config(default = "32")]
    pub capsules_per_position: usize,
    #[config(default = "8")]
    pub capsule_dim: usize,
    #[config(default = "160")]
    pub routed_dim: usize,
    #[config(default = "32")]
    pub hidden_units: usize,
    #[config(default = "3")]
    pub routings: usize,
    /// Burn momentum of the capsule batch norm (Keras momentum 0.8)
    #[config(default = "0.2")]
    pub bn_momentum: f64,
}

impl CapsNetConfig {
    /// Check that the network can be built for this input size
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_classes < 2 {
            return Err(CapsNetError::Config(format!(
                "need at least 2 classes, got {}",
                self.num_classes
            )));
        }
        if self.routings == 0 {
            return Err(CapsNetError::Config("routings must be at least 1".into()));
        }
        if self.capsule_dim == 0 || self.capsules_per_position == 0 {
            return Err(CapsNetError::Config("capsule sizes must be positive".into()));
        }
        if self.backbone.output_size(self.image_size).is_none() {
            return Err(CapsNetError::Config(format!(
                "{} needs images of at least {}px, got {}px",
                self.backbone,
                self.backbone.min_input_size(),
                self.image_size
            )));
        }
        Ok(())
    }

    /// Head configuration matching the backbone output
    pub fn head_config(&self) -> crate::Result<CapsuleHeadConfig> {
        let feature_size = self.backbone.output_size(self.image_size).ok_or_else(|| {
            CapsNetError::Config(format!(
                "image size {} too small for {}",
                self.image_size, self.backbone
            ))
        })?;

        Ok(CapsuleHeadConfig::new(
            self.backbone.out_channels(),
            feature_size,
            self.num_classes,
        )
        .with_capsules_per_position(self.capsules_per_position)
        .with_capsule_dim(self.capsule_dim)
        .with_routed_dim(self.routed_dim)
        .with_hidden_units(self.hidden_units)
        .with_routings(self.routings)
        .with_bn_momentum(self.bn_momentum))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<CapsNet<B>> {
        self.validate()?;
        let head = self.head_config()?.init(device);

        Ok(CapsNet {
            backbone: Backbone::new(self.backbone, device),
            head,
            num_classes: self.num_classes,
        })
    }
}

/// Transfer-learning classifier with a capsule-routing head
#[derive(Module, Debug)]
pub struct CapsNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: CapsuleHead<B>,
    num_classes: usize,
}

impl<B: Backend> CapsNet<B> {
    /// Images `[N, 3, H, W]` to logits `[N, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// Class probabilities
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Load backbone parameters saved with `CompactRecorder`
    pub fn with_backbone_weights(self, path: &Path, device: &B::Device) -> crate::Result<Self> {
        let CapsNet {
            backbone,
            head,
            num_classes,
        } = self;
        Ok(CapsNet {
            backbone: backbone.load_weights(path, device)?,
            head,
            num_classes,
        })
    }

    /// Layer overview with parameter counts
    pub fn summary(&self, config: &CapsNetConfig) -> String {
        let mut out = String::new();
        let head = config.head_config().ok();
        let feature = config.backbone.output_size(config.image_size).unwrap_or(0);

        out.push_str(&format!(
            "{:<28} {:>22} {:>12}\n",
            "Layer", "Output shape", "Params"
        ));
        out.push_str(&format!("{}\n", "=".repeat(64)));
        out.push_str(&format!(
            "{:<28} {:>22} {:>12}\n",
            "input",
            format!("3x{}x{}", config.image_size, config.image_size),
            0
        ));
        out.push_str(&format!(
            "{:<28} {:>22} {:>12}\n",
            config.backbone.to_string(),
            format!("{}x{}x{}", config.backbone.out_channels(), feature, feature),
            self.backbone.num_params()
        ));

        if let Some(head) = head {
            let primary = head.num_primary_capsules();
            out.push_str(&format!(
                "{:<28} {:>22} {:>12}\n",
                "primary capsules",
                format!("{}x{}", primary, config.capsule_dim),
                self.head.primary.num_params()
            ));
            out.push_str(&format!(
                "{:<28} {:>22} {:>12}\n",
                format!("routing ({} iterations)", self.head.routing.routings()),
                config.routed_dim,
                self.head.routing.num_params()
            ));
        }

        out.push_str(&format!(
            "{:<28} {:>22} {:>12}\n",
            "dense (relu)",
            config.hidden_units,
            self.head.hidden.num_params()
        ));
        out.push_str(&format!(
            "{:<28} {:>22} {:>12}\n",
            "output",
            self.num_classes,
            self.head.output.num_params()
        ));
        out.push_str(&format!("{}\n", "=".repeat(64)));
        out.push_str(&format!("Total params: {}\n", self.num_params()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_vgg_capsnet_forward() {
        let device = Default::default();
        let config = CapsNetConfig::new(BackboneKind::Vgg16, 10, 32);
        let model = config.init::<TestBackend>(&device).unwrap();

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device);
        let logits = model.forward(images.clone());
        assert_eq!(logits.dims(), [2, 10]);

        let probs = model
            .forward_softmax(images)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap();
        let row: f32 = probs[..10].iter().sum();
        assert!((row - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_head_config_for_inception() {
        let config = CapsNetConfig::new(BackboneKind::InceptionV3, 21, 75);
        let head = config.head_config().unwrap();
        assert_eq!(head.in_channels, 2048);
        assert_eq!(head.feature_size, 1);
        assert_eq!(head.num_primary_capsules(), 32);
    }

    #[test]
    fn test_validate_rejects_small_images() {
        let config = CapsNetConfig::new(BackboneKind::InceptionV3, 21, 64);
        assert!(config.validate().is_err());
        assert!(config.init::<TestBackend>(&Default::default()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_routings() {
        let config = CapsNetConfig::new(BackboneKind::Vgg16, 10, 32).with_routings(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_lists_parts() {
        let device = Default::default();
        let config = CapsNetConfig::new(BackboneKind::Vgg16, 10, 32);
        let model = config.init::<TestBackend>(&device).unwrap();
        let summary = model.summary(&config);

        assert!(summary.contains("VGG16"));
        assert!(summary.contains("primary capsules"));
        assert!(summary.contains("routing (3 iterations)"));
        assert!(summary.contains(&format!("Total params: {}", model.num_params())));
    }
}
