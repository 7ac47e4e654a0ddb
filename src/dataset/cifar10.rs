//! CIFAR-10 binary loader
//!
//! Reads the "binary version" distribution: `data_batch_1.bin` through
//! `data_batch_5.bin` plus `test_batch.bin`. Each record is one label byte
//! followed by 3072 pixel bytes (1024 red, 1024 green, 1024 blue), which is
//! already CHW order.

use std::path::Path;

use tracing::info;

use crate::dataset::image_set::{ImageSet, CHANNELS};
use crate::{CapsNetError, Result};

/// CIFAR-10 class names
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// CIFAR-10 images are 32x32
pub const IMAGE_SIZE: usize = 32;

const PIXELS_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS_PER_IMAGE;

/// Which partition of the distribution to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cifar10Split {
    Train,
    Test,
}

impl Cifar10Split {
    fn files(&self) -> Vec<String> {
        match self {
            Cifar10Split::Train => (1..=5).map(|i| format!("data_batch_{}.bin", i)).collect(),
            Cifar10Split::Test => vec!["test_batch.bin".to_string()],
        }
    }
}

/// Parse one binary batch into images scaled to [0, 1] and labels
pub fn parse_batch(bytes: &[u8]) -> Result<(Vec<Vec<f32>>, Vec<usize>)> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(CapsNetError::Dataset(format!(
            "CIFAR-10 batch length {} is not a multiple of {}",
            bytes.len(),
            RECORD_LEN
        )));
    }

    let count = bytes.len() / RECORD_LEN;
    let mut images = Vec::with_capacity(count);
    let mut labels = Vec::with_capacity(count);

    for record in bytes.chunks_exact(RECORD_LEN) {
        let label = record[0] as usize;
        if label >= CLASS_NAMES.len() {
            return Err(CapsNetError::Dataset(format!(
                "invalid CIFAR-10 label {}",
                label
            )));
        }
        labels.push(label);
        images.push(record[1..].iter().map(|&p| p as f32 / 255.0).collect());
    }

    Ok((images, labels))
}

/// Load a whole partition from `dir`
pub fn load_split<P: AsRef<Path>>(dir: P, split: Cifar10Split) -> Result<ImageSet> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(CapsNetError::PathNotFound(dir.to_path_buf()));
    }

    let mut images = Vec::new();
    let mut labels = Vec::new();
    for name in split.files() {
        let path = dir.join(&name);
        if !path.exists() {
            return Err(CapsNetError::PathNotFound(path));
        }
        let bytes = std::fs::read(&path)?;
        let (batch_images, batch_labels) = parse_batch(&bytes)?;
        info!("Loaded {} images from {}", batch_labels.len(), name);
        images.extend(batch_images);
        labels.extend(batch_labels);
    }

    ImageSet::new(
        images,
        labels,
        CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        IMAGE_SIZE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(PIXELS_PER_IMAGE));
        bytes
    }

    #[test]
    fn test_parse_batch() {
        let mut bytes = record(3, 255);
        bytes.extend(record(9, 0));

        let (images, labels) = parse_batch(&bytes).unwrap();
        assert_eq!(labels, vec![3, 9]);
        assert_eq!(images[0].len(), 3072);
        assert!(images[0].iter().all(|&v| v == 1.0));
        assert!(images[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_parse_rejects_truncated_batch() {
        let mut bytes = record(1, 7);
        bytes.pop();
        assert!(parse_batch(&bytes).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_label() {
        assert!(parse_batch(&record(10, 0)).is_err());
    }

    #[test]
    fn test_load_test_split() {
        let dir = TempDir::new().unwrap();
        let mut bytes = record(0, 51);
        bytes.extend(record(7, 102));
        std::fs::write(dir.path().join("test_batch.bin"), bytes).unwrap();

        let set = load_split(dir.path(), Cifar10Split::Test).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.class_names[7], "horse");
        assert!((set.images[0][0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_load_train_split_requires_all_batches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data_batch_1.bin"), record(0, 0)).unwrap();
        let result = load_split(dir.path(), Cifar10Split::Train);
        assert!(matches!(result, Err(CapsNetError::PathNotFound(_))));
    }
}
