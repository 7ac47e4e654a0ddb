//! Model module: backbones, the capsule-routing head and experiment configuration
//!
//! ## Architecture
//!
//! ```text
//! images [N, 3, S, S]
//!   -> backbone (VGG16 | InceptionV3)          [N, C, s, s]
//!   -> primary capsules (1x1 conv /2, squash)  [N, caps * 8]
//!   -> routing (u_hat + 3 routing iterations)  [N, 160]
//!   -> dense 32 (relu) -> dense num_classes    [N, num_classes]
//! ```

pub mod backbone;
pub mod capsnet;
pub mod capsule;
pub mod config;

pub use backbone::{Backbone, BackboneKind};
pub use capsnet::{CapsNet, CapsNetConfig};
pub use capsule::{conditional_prelu, squash, CapsuleHead, CapsuleHeadConfig};
pub use config::{DataSource, ExperimentConfig, Preset, TrainingConfig};
