//! Stratified train / validation / test splitting
//!
//! Every class is shuffled independently with a seeded `ChaCha8Rng` and cut
//! at `round(n * fraction)`, so the class proportions of the held-out part
//! follow the input. Each index ends up in exactly one partition.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{CapsNetError, Result};

/// Configuration for the two-stage split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction moved out of training in the first stage
    pub held_out_fraction: f64,
    /// Share of the held-out part that becomes the test set
    pub test_share: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        // 70% train, 10% validation, 20% test
        Self {
            held_out_fraction: 0.3,
            test_share: 2.0 / 3.0,
            seed: 2,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        check_fraction("held_out_fraction", self.held_out_fraction)?;
        check_fraction("test_share", self.test_share)
    }
}

/// Index sets produced by a split
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    pub fn log_summary(&self) {
        tracing::info!(
            "Split: {} train, {} validation, {} test",
            self.train.len(),
            self.validation.len(),
            self.test.len()
        );
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(CapsNetError::Config(format!(
            "{} must be in (0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

/// Split indices of `labels` into `(kept, held_out)`, stratified by label
pub fn stratified_split(
    labels: &[usize],
    held_out_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    check_fraction("held_out_fraction", held_out_fraction)?;

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut kept = Vec::with_capacity(labels.len());
    let mut held_out = Vec::new();

    for (_, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n_held = ((indices.len() as f64 * held_out_fraction).round() as usize).min(indices.len());
        let cut = indices.len() - n_held;
        held_out.extend_from_slice(&indices[cut..]);
        kept.extend_from_slice(&indices[..cut]);
    }

    kept.shuffle(&mut rng);
    held_out.shuffle(&mut rng);
    Ok((kept, held_out))
}

/// Two-stage split: train vs held-out, then held-out into validation and test
pub fn three_way_split(labels: &[usize], config: &SplitConfig) -> Result<SplitIndices> {
    config.validate()?;

    let (train, temp) = stratified_split(labels, config.held_out_fraction, config.seed)?;
    let temp_labels: Vec<usize> = temp.iter().map(|&i| labels[i]).collect();
    let (val_pos, test_pos) = stratified_split(&temp_labels, config.test_share, config.seed)?;

    Ok(SplitIndices {
        train,
        validation: val_pos.into_iter().map(|p| temp[p]).collect(),
        test: test_pos.into_iter().map(|p| temp[p]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<usize> {
        let mut labels = vec![0; 100];
        labels.extend(vec![1; 50]);
        labels.extend(vec![2; 30]);
        labels
    }

    fn count(indices: &[usize], labels: &[usize], class: usize) -> usize {
        indices.iter().filter(|&&i| labels[i] == class).count()
    }

    #[test]
    fn test_stratified_proportions() {
        let labels = labels();
        let (kept, held) = stratified_split(&labels, 0.3, 2).unwrap();

        assert_eq!(kept.len() + held.len(), labels.len());
        assert_eq!(count(&held, &labels, 0), 30);
        assert_eq!(count(&held, &labels, 1), 15);
        assert_eq!(count(&held, &labels, 2), 9);
    }

    #[test]
    fn test_three_way_covers_every_index_once() {
        let labels = labels();
        let split = three_way_split(&labels, &SplitConfig::default()).unwrap();

        let mut all: Vec<usize> = split
            .train
            .iter()
            .chain(&split.validation)
            .chain(&split.test)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..labels.len()).collect::<Vec<_>>());

        assert_eq!(split.train.len(), 126);
        assert_eq!(split.validation.len() + split.test.len(), 54);
        assert_eq!(count(&split.test, &labels, 0), 20);
        assert_eq!(count(&split.validation, &labels, 0), 10);
    }

    #[test]
    fn test_split_is_deterministic() {
        let labels = labels();
        let a = three_way_split(&labels, &SplitConfig::default()).unwrap();
        let b = three_way_split(&labels, &SplitConfig::default()).unwrap();
        assert_eq!(a, b);

        let other = SplitConfig {
            seed: 3,
            ..Default::default()
        };
        let c = three_way_split(&labels, &other).unwrap();
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_rejects_bad_fraction() {
        assert!(stratified_split(&[0, 1], 0.0, 1).is_err());
        assert!(stratified_split(&[0, 1], 1.0, 1).is_err());
        let config = SplitConfig {
            test_share: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
