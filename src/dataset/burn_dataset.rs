//! Burn Dataset and Batcher for in-memory image sets

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::image_set::CHANNELS;

/// A single preprocessed image ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageItem {
    /// Flattened CHW float data
    pub image: Vec<f32>,
    pub label: usize,
}

/// Dataset backed by a vector of items
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    items: Vec<ImageItem>,
}

impl InMemoryDataset {
    pub fn new(items: Vec<ImageItem>) -> Self {
        Self { items }
    }
}

impl Dataset<ImageItem> for InMemoryDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images and their class indices
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into `ImageBatch`es; pixels are used as-is
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, CHANNELS, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn item(label: usize, value: f32) -> ImageItem {
        ImageItem {
            image: vec![value; 3 * 2 * 2],
            label,
        }
    }

    #[test]
    fn test_dataset_access() {
        let dataset = InMemoryDataset::new(vec![item(0, 0.1), item(2, 0.2), item(2, 0.3)]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(1).map(|i| i.label), Some(2));
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let batcher = ImageBatcher::new(2);
        let batch: ImageBatch<TestBackend> =
            batcher.batch(vec![item(1, 0.5), item(4, 0.25)], &device);

        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.targets.dims(), [2]);

        let pixels = batch.images.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(pixels[0], 0.5);
        assert_eq!(pixels[12], 0.25);

        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 4]);
    }
}
