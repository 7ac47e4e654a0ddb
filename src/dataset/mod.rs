//! Dataset module
//!
//! This module provides functionality for:
//! - Loading class-per-directory image folders and the CIFAR-10 binaries
//! - SMOTE oversampling of minority classes
//! - Stratified train / validation / test splitting
//! - Burn `Dataset` and `Batcher` integration

pub mod burn_dataset;
pub mod cifar10;
pub mod folder;
pub mod image_set;
pub mod oversample;
pub mod split;

pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem, InMemoryDataset};
pub use cifar10::Cifar10Split;
pub use folder::{ClassIntensity, FolderLoadOptions, ImageFolder};
pub use image_set::ImageSet;
pub use oversample::{SamplingStrategy, Smote};
pub use split::{stratified_split, three_way_split, SplitConfig, SplitIndices};
