//! In-memory labelled image collection
//!
//! Every image is a flattened CHW `f32` vector of length `3 * size * size`.
//! Sources (image folders, CIFAR-10), oversampling and splitting all
//! exchange data through this type.

use serde::{Deserialize, Serialize};

use crate::dataset::burn_dataset::ImageItem;
use crate::{CapsNetError, Result};

/// Number of colour channels carried by every image
pub const CHANNELS: usize = 3;

/// Labelled images plus their class names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSet {
    /// Flattened CHW images
    pub images: Vec<Vec<f32>>,
    /// Class index per image
    pub labels: Vec<usize>,
    /// Class names, indexed by label
    pub class_names: Vec<String>,
    /// Side length of the square images
    pub image_size: usize,
}

impl ImageSet {
    /// Create a set, checking that every image and label is consistent
    pub fn new(
        images: Vec<Vec<f32>>,
        labels: Vec<usize>,
        class_names: Vec<String>,
        image_size: usize,
    ) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(CapsNetError::Dataset(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }

        let expected = CHANNELS * image_size * image_size;
        if let Some(pos) = images.iter().position(|img| img.len() != expected) {
            return Err(CapsNetError::Dataset(format!(
                "image {} has {} values, expected {}",
                pos,
                images[pos].len(),
                expected
            )));
        }

        if let Some(&bad) = labels.iter().find(|&&l| l >= class_names.len()) {
            return Err(CapsNetError::Dataset(format!(
                "label {} out of range for {} classes",
                bad,
                class_names.len()
            )));
        }

        Ok(Self {
            images,
            labels,
            class_names,
            image_size,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Length of one flattened image
    pub fn feature_len(&self) -> usize {
        CHANNELS * self.image_size * self.image_size
    }

    /// Number of images per class
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    /// Copy out the images at `indices`, in that order
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            images: indices.iter().map(|&i| self.images[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            class_names: self.class_names.clone(),
            image_size: self.image_size,
        }
    }

    /// Convert into burn dataset items
    pub fn into_items(self) -> Vec<ImageItem> {
        self.images
            .into_iter()
            .zip(self.labels)
            .map(|(image, label)| ImageItem { image, label })
            .collect()
    }

    /// Log the class distribution at info level
    pub fn log_distribution(&self, title: &str) {
        tracing::info!("{}: {} images in {} classes", title, self.len(), self.num_classes());
        for (name, count) in self.class_names.iter().zip(self.class_counts()) {
            tracing::info!("  {:<30} {:>6}", name, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(labels: Vec<usize>) -> ImageSet {
        let images = labels.iter().map(|&l| vec![l as f32; 12]).collect();
        ImageSet::new(images, labels, vec!["a".into(), "b".into(), "c".into()], 2).unwrap()
    }

    #[test]
    fn test_class_counts() {
        let set = tiny(vec![0, 2, 2, 1, 2]);
        assert_eq!(set.class_counts(), vec![1, 1, 3]);
        assert_eq!(set.feature_len(), 12);
    }

    #[test]
    fn test_subset_keeps_order() {
        let set = tiny(vec![0, 1, 2]);
        let sub = set.subset(&[2, 0]);
        assert_eq!(sub.labels, vec![2, 0]);
        assert_eq!(sub.images[0][0], 2.0);
        assert_eq!(sub.class_names.len(), 3);
    }

    #[test]
    fn test_rejects_wrong_image_length() {
        let err = ImageSet::new(vec![vec![0.0; 5]], vec![0], vec!["a".into()], 2);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_label_out_of_range() {
        let err = ImageSet::new(vec![vec![0.0; 12]], vec![4], vec!["a".into()], 2);
        assert!(err.is_err());
    }
}
