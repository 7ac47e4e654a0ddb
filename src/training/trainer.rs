//! Training loop for `CapsNet`
//!
//! Runs Adam on shuffled mini-batches, evaluates on the validation set after
//! every epoch and drives the epoch callbacks:
//! - `log.csv` history, rewritten every epoch
//! - best-model checkpoint on validation accuracy
//! - learning-rate schedule (reduce on plateau by default)
//! - optional early stopping

use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::dataset::burn_dataset::{ImageBatch, ImageBatcher, InMemoryDataset};
use crate::model::capsnet::CapsNet;
use crate::model::config::{ExperimentConfig, TrainingConfig};
use crate::training::checkpoint::{BestCheckpoint, CheckpointMetadata};
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::training::scheduler::LearningRateScheduler;
use crate::utils::logging::{ProgressLogger, TrainingLogger};
use crate::utils::metrics::RunningAverage;
use crate::{CapsNetError, Result};

/// Name of the per-epoch CSV log inside the output directory
pub const LOG_FILE: &str = "log.csv";

/// Mutable bookkeeping of a run
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    pub best_val_accuracy: f64,
    pub epochs_without_improvement: usize,
    pub current_lr: f64,
    pub samples_seen: usize,
}

impl TrainingState {
    pub fn new(initial_lr: f64) -> Self {
        Self {
            epoch: 0,
            best_val_accuracy: 0.0,
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            samples_seen: 0,
        }
    }

    /// Track the best validation accuracy; returns true on a strict improvement
    pub fn update_best(&mut self, val_accuracy: f64) -> bool {
        if val_accuracy > self.best_val_accuracy {
            self.best_val_accuracy = val_accuracy;
            self.epochs_without_improvement = 0;
            true
        } else {
            self.epochs_without_improvement += 1;
            false
        }
    }
}

/// Loss, accuracy and argmax predictions over a labelled set
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Sample-weighted mean cross-entropy
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

/// Trains one network for one experiment
pub struct Trainer<B: AutodiffBackend> {
    pub config: TrainingConfig,
    pub state: TrainingState,
    experiment: ExperimentConfig,
    class_names: Vec<String>,
    output_dir: PathBuf,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(experiment: &ExperimentConfig, class_names: &[String], device: B::Device) -> Self {
        let config = experiment.training.clone();
        Self {
            state: TrainingState::new(config.learning_rate),
            config,
            experiment: experiment.clone(),
            class_names: class_names.to_vec(),
            output_dir: experiment.output_dir.clone(),
            device,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE)
    }

    /// Train `model` on `train`, validating on `val` after every epoch
    ///
    /// Returns the model after the last epoch together with its history. The
    /// best model by validation accuracy is kept on disk by the checkpoint.
    pub fn fit(
        &mut self,
        mut model: CapsNet<B>,
        train: &InMemoryDataset,
        val: &InMemoryDataset,
    ) -> Result<(CapsNet<B>, TrainingHistory)> {
        self.config.validate()?;
        if train.is_empty() {
            return Err(CapsNetError::Training("training set is empty".into()));
        }
        std::fs::create_dir_all(&self.output_dir)?;

        let batcher = ImageBatcher::new(self.experiment.image_size);
        let mut optimizer = AdamConfig::new()
            .with_beta_1(self.config.beta_1)
            .with_beta_2(self.config.beta_2)
            .with_epsilon(self.config.epsilon)
            .init::<B, CapsNet<B>>();
        let mut scheduler =
            LearningRateScheduler::new(self.config.scheduler.clone(), self.config.learning_rate);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut checkpoint = BestCheckpoint::new(&self.output_dir);
        let mut history = TrainingHistory::new();
        let mut logger = TrainingLogger::new(self.config.epochs);
        let log_path = self.log_path();

        info!(
            "Train on {} samples, validate on {} samples",
            train.len(),
            val.len()
        );

        for epoch in 0..self.config.epochs {
            self.state.epoch = epoch;
            self.state.current_lr = scheduler.get_lr();
            logger.start_epoch(epoch);
            println!(
                "{}",
                format!("Epoch {}/{}", epoch + 1, self.config.epochs)
                    .yellow()
                    .bold()
            );

            let (trained, loss, accuracy) =
                self.train_epoch(model, &mut optimizer, train, &batcher, &mut rng)?;
            model = trained;

            let validation = evaluate(
                &model.valid(),
                val,
                &batcher,
                self.config.eval_batch_size,
                &self.device,
            )?;

            history.push(EpochRecord {
                epoch,
                accuracy,
                loss,
                val_accuracy: validation.accuracy,
                val_loss: validation.loss,
                lr: self.state.current_lr,
            });
            history.save_csv(&log_path)?;

            logger.end_epoch(loss, validation.loss, validation.accuracy, self.state.current_lr);

            let metadata = CheckpointMetadata::new(
                epoch,
                validation.accuracy,
                validation.loss,
                self.state.current_lr,
                &self.class_names,
                &self.experiment,
            );
            let saved = checkpoint.update(&model, &metadata)?;
            println!(
                "  {} loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}{}",
                "→".cyan(),
                loss,
                accuracy,
                validation.loss,
                validation.accuracy,
                if saved {
                    " (best)".green().to_string()
                } else {
                    String::new()
                }
            );

            self.state.update_best(validation.accuracy);
            if scheduler.step(validation.accuracy) {
                info!(
                    "Epoch {}: reducing learning rate to {:e}",
                    epoch + 1,
                    scheduler.get_lr()
                );
            }

            if let Some(patience) = self.config.early_stopping_patience {
                if self.state.epochs_without_improvement >= patience {
                    logger.log_early_stop(patience);
                    break;
                }
            }
        }

        info!(
            "Training finished in {:.1}s, best val_accuracy {:.4}",
            logger.elapsed_secs(),
            self.state.best_val_accuracy
        );
        Ok((model, history))
    }

    /// One pass over the shuffled training set; returns (model, loss, accuracy)
    fn train_epoch<O>(
        &mut self,
        mut model: CapsNet<B>,
        optimizer: &mut O,
        dataset: &InMemoryDataset,
        batcher: &ImageBatcher,
        rng: &mut ChaCha8Rng,
    ) -> Result<(CapsNet<B>, f64, f64)>
    where
        O: Optimizer<CapsNet<B>, B>,
    {
        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        indices.shuffle(rng);

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut loss_avg = RunningAverage::new();
        let mut correct = 0usize;
        let mut seen = 0usize;

        let num_batches = indices.len().div_ceil(self.config.batch_size);
        let mut progress = ProgressLogger::new("Training batches", num_batches);

        for (batch_idx, chunk) in indices.chunks(self.config.batch_size).enumerate() {
            let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
            if items.is_empty() {
                continue;
            }
            let batch: ImageBatch<B> = batcher.batch(items, &self.device);
            let targets = batch.targets.clone();
            let batch_len = targets.dims()[0];

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets);
            let loss_value = loss.clone().into_scalar().elem::<f64>();

            correct += count_correct(&argmax_rows(output)?, &read_labels(targets)?);
            seen += batch_len;
            loss_avg.update(loss_value, batch_len);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(self.state.current_lr, model, grads);

            self.state.samples_seen += batch_len;
            progress.update(batch_idx + 1);
            debug!(
                "  Batch {}/{}: loss = {:.4}",
                batch_idx + 1,
                num_batches,
                loss_value
            );
        }
        progress.finish();

        let accuracy = if seen > 0 {
            correct as f64 / seen as f64
        } else {
            0.0
        };
        Ok((model, loss_avg.mean(), accuracy))
    }
}

/// Score `model` on a labelled dataset in batches of `batch_size`
///
/// Intended for the inner backend, i.e. `model.valid()`.
pub fn evaluate<B: Backend>(
    model: &CapsNet<B>,
    dataset: &InMemoryDataset,
    batcher: &ImageBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    if batch_size == 0 {
        return Err(CapsNetError::InvalidInput("batch size must be positive".into()));
    }

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut loss_avg = RunningAverage::new();
    let mut predictions = Vec::with_capacity(dataset.len());
    let mut targets = Vec::with_capacity(dataset.len());

    for start in (0..dataset.len()).step_by(batch_size) {
        let end = (start + batch_size).min(dataset.len());
        let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch: ImageBatch<B> = batcher.batch(items, device);
        let batch_targets = read_labels(batch.targets.clone())?;
        let output = model.forward(batch.images);
        let loss = loss_fn.forward(output.clone(), batch.targets);

        loss_avg.update(loss.into_scalar().elem::<f64>(), batch_targets.len());
        predictions.extend(argmax_rows(output)?);
        targets.extend(batch_targets);
    }

    let accuracy = if targets.is_empty() {
        0.0
    } else {
        count_correct(&predictions, &targets) as f64 / targets.len() as f64
    };

    Ok(Evaluation {
        loss: loss_avg.mean(),
        accuracy,
        predictions,
        targets,
    })
}

/// Row-wise argmax of `[N, C]` scores; the first maximum wins
pub fn argmax_rows<B: Backend>(scores: Tensor<B, 2>) -> Result<Vec<usize>> {
    let [_, num_classes] = scores.dims();
    let values = scores
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CapsNetError::Training(format!("failed to read scores: {:?}", e)))?;

    Ok(values
        .chunks(num_classes.max(1))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect())
}

fn read_labels<B: Backend>(targets: Tensor<B, 1, burn::tensor::Int>) -> Result<Vec<usize>> {
    let labels = targets
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| CapsNetError::Training(format!("failed to read targets: {:?}", e)))?;
    Ok(labels.into_iter().map(|l| l as usize).collect())
}

fn count_correct(predictions: &[usize], targets: &[usize]) -> usize {
    predictions
        .iter()
        .zip(targets)
        .filter(|(p, t)| p == t)
        .count()
}
