//! Convolutional backbones feeding the capsule head

pub mod inception;
pub mod vgg;

use std::path::Path;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

pub use inception::InceptionV3;
pub use vgg::Vgg16;

use crate::{CapsNetError, Result};

/// Serializable backbone selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    Vgg16,
    InceptionV3,
}

impl BackboneKind {
    pub fn out_channels(&self) -> usize {
        match self {
            BackboneKind::Vgg16 => vgg::OUT_CHANNELS,
            BackboneKind::InceptionV3 => inception::OUT_CHANNELS,
        }
    }

    /// Smallest square input the backbone accepts
    pub fn min_input_size(&self) -> usize {
        match self {
            BackboneKind::Vgg16 => vgg::MIN_INPUT,
            BackboneKind::InceptionV3 => inception::MIN_INPUT,
        }
    }

    /// Feature map side length for a square input
    pub fn output_size(&self, input: usize) -> Option<usize> {
        if input < self.min_input_size() {
            return None;
        }
        match self {
            BackboneKind::Vgg16 => Some(vgg::feature_size(input)),
            BackboneKind::InceptionV3 => inception::feature_size(input),
        }
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneKind::Vgg16 => write!(f, "VGG16"),
            BackboneKind::InceptionV3 => write!(f, "InceptionV3"),
        }
    }
}

/// Backbone network
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    Vgg16(Vgg16<B>),
    InceptionV3(InceptionV3<B>),
}

impl<B: Backend> Backbone<B> {
    pub fn new(kind: BackboneKind, device: &B::Device) -> Self {
        match kind {
            BackboneKind::Vgg16 => Backbone::Vgg16(Vgg16::new(device)),
            BackboneKind::InceptionV3 => Backbone::InceptionV3(InceptionV3::new(device)),
        }
    }

    pub fn kind(&self) -> BackboneKind {
        match self {
            Backbone::Vgg16(_) => BackboneKind::Vgg16,
            Backbone::InceptionV3(_) => BackboneKind::InceptionV3,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Backbone::Vgg16(model) => model.forward(x),
            Backbone::InceptionV3(model) => model.forward(x),
        }
    }

    /// Replace the parameters with a record saved by `CompactRecorder`
    pub fn load_weights(self, path: &Path, device: &B::Device) -> Result<Self> {
        let kind = self.kind();
        let recorder = CompactRecorder::new();
        let loaded = self.load_file(path, &recorder, device).map_err(|e| {
            CapsNetError::Model(format!("failed to load {} weights from {:?}: {}", kind, path, e))
        })?;
        tracing::info!("Loaded {} backbone weights from {:?}", kind, path);
        Ok(loaded)
    }

    /// Save the parameters with `CompactRecorder`
    pub fn save_weights(self, path: &Path) -> Result<()> {
        let kind = self.kind();
        self.save_file(path, &CompactRecorder::new()).map_err(|e| {
            CapsNetError::Model(format!("failed to save {} weights to {:?}: {}", kind, path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_kind_output_sizes() {
        assert_eq!(BackboneKind::InceptionV3.output_size(75), Some(1));
        assert_eq!(BackboneKind::InceptionV3.output_size(74), None);
        assert_eq!(BackboneKind::Vgg16.output_size(32), Some(1));
        assert_eq!(BackboneKind::Vgg16.output_size(16), None);
        assert_eq!(BackboneKind::InceptionV3.out_channels(), 2048);
    }

    #[test]
    fn test_weights_round_trip() {
        let device = Default::default();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vgg");

        let backbone = Backbone::<TestBackend>::new(BackboneKind::Vgg16, &device);
        let params = backbone.num_params();
        backbone.save_weights(&path).unwrap();

        let fresh = Backbone::<TestBackend>::new(BackboneKind::Vgg16, &device)
            .load_weights(&path, &device)
            .unwrap();
        assert_eq!(fresh.num_params(), params);
        assert_eq!(fresh.kind(), BackboneKind::Vgg16);
    }
}
