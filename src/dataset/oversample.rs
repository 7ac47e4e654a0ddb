//! SMOTE oversampling for imbalanced classes
//!
//! Synthetic Minority Over-sampling TEchnique: for each sample to add, pick a
//! random member of the class, pick one of its `k` nearest same-class
//! neighbours, and interpolate a random fraction of the way between them.
//!
//! The output keeps every original sample in its original order, followed
//! by the synthetic samples grouped by class in ascending class order.

use std::collections::{BTreeMap, HashMap};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::image_set::ImageSet;
use crate::{CapsNetError, Result};

/// Target count per class after resampling
///
/// Classes missing from the map are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingStrategy {
    pub targets: BTreeMap<usize, usize>,
}

impl SamplingStrategy {
    pub fn new(targets: BTreeMap<usize, usize>) -> Self {
        Self { targets }
    }

    pub fn from_pairs(pairs: &[(usize, usize)]) -> Self {
        Self {
            targets: pairs.iter().copied().collect(),
        }
    }

    /// Target table used for the 21-class image-folder experiment
    pub fn image_folder_table() -> Self {
        Self::from_pairs(&[
            (0, 5000),
            (1, 20000),
            (2, 5000),
            (3, 12000),
            (4, 28000),
            (5, 6000),
            (6, 5000),
            (7, 5000),
            (8, 5000),
            (9, 5000),
            (10, 27000),
            (11, 5000),
            (12, 5000),
            (13, 8000),
            (14, 10000),
            (15, 30000),
            (16, 5000),
            (17, 5000),
            (18, 5000),
            (19, 8000),
            (20, 12000),
        ])
    }

    /// Check the strategy against the current class counts
    pub fn validate(&self, counts: &[usize]) -> Result<()> {
        for (&class, &target) in &self.targets {
            let Some(&count) = counts.get(class) else {
                return Err(CapsNetError::Oversample(format!(
                    "class {} in sampling strategy but only {} classes exist",
                    class,
                    counts.len()
                )));
            };
            if target < count {
                return Err(CapsNetError::Oversample(format!(
                    "target {} for class {} is below its current count {}",
                    target, class, count
                )));
            }
            if count == 0 && target > 0 {
                return Err(CapsNetError::Oversample(format!(
                    "class {} has no samples to oversample from",
                    class
                )));
            }
        }
        Ok(())
    }

    /// Class counts after resampling
    pub fn resampled_counts(&self, counts: &[usize]) -> Vec<usize> {
        counts
            .iter()
            .enumerate()
            .map(|(class, &count)| self.targets.get(&class).copied().unwrap_or(count).max(count))
            .collect()
    }
}

/// SMOTE parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Smote {
    /// Neighbours considered per base sample
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for Smote {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self { k_neighbors, seed }
    }

    /// Resample an image set according to `strategy`
    pub fn fit_resample(&self, set: &ImageSet, strategy: &SamplingStrategy) -> Result<ImageSet> {
        let (images, labels) =
            self.resample(&set.images, &set.labels, set.num_classes(), strategy)?;
        ImageSet::new(images, labels, set.class_names.clone(), set.image_size)
    }

    /// Resample flat feature vectors
    pub fn resample(
        &self,
        features: &[Vec<f32>],
        labels: &[usize],
        num_classes: usize,
        strategy: &SamplingStrategy,
    ) -> Result<(Vec<Vec<f32>>, Vec<usize>)> {
        if features.len() != labels.len() {
            return Err(CapsNetError::Oversample(format!(
                "{} samples but {} labels",
                features.len(),
                labels.len()
            )));
        }
        if self.k_neighbors == 0 {
            return Err(CapsNetError::Oversample(
                "k_neighbors must be at least 1".to_string(),
            ));
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
        for (idx, &label) in labels.iter().enumerate() {
            if label >= num_classes {
                return Err(CapsNetError::Oversample(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                )));
            }
            members[label].push(idx);
        }
        let counts: Vec<usize> = members.iter().map(|m| m.len()).collect();
        strategy.validate(&counts)?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut out_features = features.to_vec();
        let mut out_labels = labels.to_vec();

        for (&class, &target) in &strategy.targets {
            let class_members = &members[class];
            let needed = target - class_members.len();
            if needed == 0 {
                continue;
            }

            let synthetic = self.synthesize(features, class_members, needed, &mut rng);
            debug!("Class {}: +{} synthetic samples", class, synthetic.len());
            out_labels.extend(std::iter::repeat(class).take(synthetic.len()));
            out_features.extend(synthetic);
        }

        info!(
            "SMOTE: {} -> {} samples",
            features.len(),
            out_features.len()
        );
        Ok((out_features, out_labels))
    }

    fn synthesize(
        &self,
        features: &[Vec<f32>],
        class_members: &[usize],
        needed: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Vec<f32>> {
        if class_members.len() == 1 {
            return vec![features[class_members[0]].clone(); needed];
        }

        let k = self.k_neighbors.min(class_members.len() - 1);
        let bases: Vec<usize> = (0..needed)
            .map(|_| rng.gen_range(0..class_members.len()))
            .collect();

        // Only the drawn bases need a neighbour list
        let mut unique_bases = bases.clone();
        unique_bases.sort_unstable();
        unique_bases.dedup();
        let neighbours: HashMap<usize, Vec<usize>> = unique_bases
            .par_iter()
            .map(|&b| (b, nearest_neighbours(features, class_members, b, k)))
            .collect();

        bases
            .into_iter()
            .map(|b| {
                let candidates = &neighbours[&b];
                let nn = candidates[rng.gen_range(0..candidates.len())];
                let gap: f32 = rng.gen();
                let base = &features[class_members[b]];
                let other = &features[class_members[nn]];
                base.iter()
                    .zip(other)
                    .map(|(&x, &y)| x + gap * (y - x))
                    .collect()
            })
            .collect()
    }
}

/// Positions (within `class_members`) of the `k` nearest members to `base`
fn nearest_neighbours(
    features: &[Vec<f32>],
    class_members: &[usize],
    base: usize,
    k: usize,
) -> Vec<usize> {
    let anchor = &features[class_members[base]];
    let mut distances: Vec<(f32, usize)> = class_members
        .iter()
        .enumerate()
        .filter(|&(pos, _)| pos != base)
        .map(|(pos, &idx)| (squared_distance(anchor, &features[idx]), pos))
        .collect();

    let k = k.min(distances.len());
    if k < distances.len() {
        distances.select_nth_unstable_by(k, |a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        distances.truncate(k);
    }
    distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    distances.into_iter().map(|(_, pos)| pos).collect()
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
