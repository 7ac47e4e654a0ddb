//! End-to-end experiment pipeline
//!
//! load → oversample → split → build → fit → predict → report

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    module::{AutodiffModule, Module},
    tensor::backend::{AutodiffBackend, Backend},
};
use colored::Colorize;
use tracing::info;

use crate::dataset::burn_dataset::{ImageBatcher, InMemoryDataset};
use crate::dataset::cifar10::{self, Cifar10Split};
use crate::dataset::folder::ImageFolder;
use crate::dataset::image_set::ImageSet;
use crate::dataset::split::{stratified_split, three_way_split};
use crate::model::config::{DataSource, ExperimentConfig};
use crate::training::checkpoint::{load_checkpoint, METADATA_FILE};
use crate::training::history::TrainingHistory;
use crate::training::trainer::{evaluate, Trainer};
use crate::utils::charts::{generate_confusion_matrix, plot_history};
use crate::utils::error::ResultExt;
use crate::utils::metrics::Metrics;
use crate::utils::{format_duration, format_hms};
use crate::{CapsNetError, Result};

/// Train, validation and test partitions of one experiment
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub class_names: Vec<String>,
    pub train: ImageSet,
    pub validation: ImageSet,
    pub test: ImageSet,
}

impl PreparedData {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }
}

/// Outcome of a full run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: Metrics,
    pub history: TrainingHistory,
    pub training_secs: f64,
    pub total_secs: f64,
    pub output_dir: PathBuf,
}

/// Class counts of a source, before and after the configured oversampling
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub class_names: Vec<String>,
    pub counts: Vec<usize>,
    pub resampled: Option<Vec<usize>>,
}

impl DatasetStats {
    pub fn print(&self) {
        println!("{}", "Class distribution:".cyan().bold());
        let total: usize = self.counts.iter().sum();
        for (i, name) in self.class_names.iter().enumerate() {
            match &self.resampled {
                Some(after) => println!(
                    "  {:>3} {:<30} {:>7} -> {:>7}",
                    i, name, self.counts[i], after[i]
                ),
                None => println!("  {:>3} {:<30} {:>7}", i, name, self.counts[i]),
            }
        }
        match &self.resampled {
            Some(after) => println!(
                "  Total: {} -> {}",
                total,
                after.iter().sum::<usize>()
            ),
            None => println!("  Total: {}", total),
        }
    }
}

/// Load, oversample and split the data of `config`
///
/// Image folders are oversampled as a whole and then split 70/10/20.
/// CIFAR-10 keeps its test batch; validation comes out of the training batches.
pub fn prepare_data(config: &ExperimentConfig) -> Result<PreparedData> {
    match &config.source {
        DataSource::ImageFolder {
            root, extensions, ..
        } => {
            let options = config
                .folder_options()
                .context("image-folder source without decode options")?;
            let folder = ImageFolder::scan(root, extensions)?;
            let mut set = folder.load(&options)?;
            set.log_distribution("Loaded");

            if let Some(oversample) = &config.oversample {
                set = oversample.smote().fit_resample(&set, &oversample.strategy)?;
                set.log_distribution("After SMOTE");
            }

            let split = three_way_split(&set.labels, &config.split)?;
            split.log_summary();

            Ok(PreparedData {
                class_names: set.class_names.clone(),
                train: set.subset(&split.train),
                validation: set.subset(&split.validation),
                test: set.subset(&split.test),
            })
        }
        DataSource::Cifar10 {
            root,
            validation_fraction,
        } => {
            let mut train = cifar10::load_split(root, Cifar10Split::Train)?;
            let test = cifar10::load_split(root, Cifar10Split::Test)?;

            if let Some(oversample) = &config.oversample {
                train = oversample.smote().fit_resample(&train, &oversample.strategy)?;
            }

            let (kept, held) =
                stratified_split(&train.labels, *validation_fraction, config.split.seed)?;
            info!(
                "Split: {} train, {} validation, {} test",
                kept.len(),
                held.len(),
                test.len()
            );

            Ok(PreparedData {
                class_names: train.class_names.clone(),
                validation: train.subset(&held),
                train: train.subset(&kept),
                test,
            })
        }
    }
}

/// Count images per class without decoding them where possible
pub fn dataset_stats(config: &ExperimentConfig) -> Result<DatasetStats> {
    let (class_names, counts) = match &config.source {
        DataSource::ImageFolder {
            root, extensions, ..
        } => {
            let folder = ImageFolder::scan(root, extensions)?;
            (folder.class_names.clone(), folder.class_counts())
        }
        DataSource::Cifar10 { root, .. } => {
            let train = cifar10::load_split(root, Cifar10Split::Train)?;
            (train.class_names.clone(), train.class_counts())
        }
    };

    let resampled = match &config.oversample {
        Some(oversample) => {
            oversample.strategy.validate(&counts)?;
            Some(oversample.strategy.resampled_counts(&counts))
        }
        None => None,
    };

    Ok(DatasetStats {
        class_names,
        counts,
        resampled,
    })
}

/// Run one experiment from data loading to the final report
pub fn run_experiment<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: B::Device,
) -> Result<RunReport> {
    let start = Instant::now();
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)?;
    config.save(&config.output_dir.join("config.json"))?;

    println!("{}", format!("Experiment: {}", config.name).green().bold());
    println!("{}", "Loading Dataset...".cyan());
    let data = prepare_data(config)?;

    println!("{}", "Creating Model...".cyan());
    let model_config = config.model_config(data.num_classes());
    let mut model = model_config.init::<B>(&device)?;
    if let Some(weights) = &config.backbone_weights {
        model = model.with_backbone_weights(weights, &device)?;
    }
    println!("{}", model.summary(&model_config));

    let PreparedData {
        class_names,
        train,
        validation,
        test,
    } = data;
    let train = InMemoryDataset::new(train.into_items());
    let validation = InMemoryDataset::new(validation.into_items());
    let test = InMemoryDataset::new(test.into_items());

    println!("{}", "Starting Training...".green().bold());
    let fit_start = Instant::now();
    let mut trainer = Trainer::<B>::new(config, &class_names, device.clone());
    let (model, history) = trainer.fit(model, &train, &validation)?;
    let training_secs = fit_start.elapsed().as_secs_f64();
    println!("Training time: {}", format_hms(training_secs));

    let evaluation = evaluate(
        &model.valid(),
        &test,
        &ImageBatcher::new(config.image_size),
        config.training.eval_batch_size,
        &device,
    )?;
    let metrics = Metrics::from_predictions(
        &evaluation.predictions,
        &evaluation.targets,
        &class_names,
    );

    write_report(&metrics, &class_names, &config.output_dir)?;
    let charts = plot_history(&history, &config.output_dir)?;
    info!("Wrote charts {:?}", charts);

    println!("Test acc: {}", metrics.accuracy);
    let total_secs = start.elapsed().as_secs_f64();
    println!("Execution time: {} seconds", total_secs);

    Ok(RunReport {
        metrics,
        history,
        training_secs,
        total_secs,
        output_dir: config.output_dir.clone(),
    })
}

/// Re-run the test report for the checkpoint stored in `checkpoint_dir`
pub fn evaluate_checkpoint<B: Backend>(checkpoint_dir: &Path, device: B::Device) -> Result<Metrics> {
    if !checkpoint_dir.join(METADATA_FILE).exists() {
        return Err(CapsNetError::PathNotFound(checkpoint_dir.join(METADATA_FILE)));
    }
    let start = Instant::now();
    let (model, metadata) = load_checkpoint::<B>(checkpoint_dir, &device)?;
    println!(
        "Checkpoint: epoch {}, val_accuracy {:.4}, saved {}",
        metadata.epoch + 1,
        metadata.val_accuracy,
        metadata.timestamp
    );

    let data = prepare_data(&metadata.experiment)?;
    if data.class_names != metadata.class_names {
        return Err(CapsNetError::Dataset(format!(
            "checkpoint classes {:?} do not match data classes {:?}",
            metadata.class_names, data.class_names
        )));
    }

    let test = InMemoryDataset::new(data.test.into_items());
    let evaluation = evaluate(
        &model,
        &test,
        &ImageBatcher::new(metadata.experiment.image_size),
        metadata.experiment.training.eval_batch_size,
        &device,
    )?;
    let metrics = Metrics::from_predictions(
        &evaluation.predictions,
        &evaluation.targets,
        &metadata.class_names,
    );

    write_report(&metrics, &metadata.class_names, checkpoint_dir)?;
    println!("Test acc: {}", metrics.accuracy);
    info!(
        "Evaluated {} parameters in {}",
        model.num_params(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(metrics)
}

/// Print the per-class table and save the JSON, CSV and SVG reports
pub fn write_report(metrics: &Metrics, class_names: &[String], output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;

    println!("{}", metrics.performance_table());
    println!("{}", metrics);

    metrics.save_json(&output_dir.join("metrics.json"))?;
    metrics
        .confusion_matrix
        .save_csv(&output_dir.join("confusion_matrix.csv"), class_names)?;
    generate_confusion_matrix(
        &metrics.confusion_matrix,
        class_names,
        &output_dir.join("confusion_matrix.svg"),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::folder::ClassIntensity;
    use crate::dataset::oversample::SamplingStrategy;
    use crate::model::backbone::BackboneKind;
    use crate::model::config::{OversampleConfig, TrainingConfig};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestAutodiffBackend = Autodiff<NdArray>;

    /// Three classes of small jpgs: 12, 8 and 5 images
    fn image_folder(dir: &Path) -> PathBuf {
        let root = dir.join("images");
        for (class, count) in [("ant", 12), ("bee", 8), ("cat", 5)] {
            let class_dir = root.join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..count {
                let img = RgbImage::from_fn(40, 40, |x, y| {
                    Rgb([(x * 6) as u8, (y * 6) as u8, (i * 20) as u8])
                });
                img.save(class_dir.join(format!("{}_{}.jpg", class, i))).unwrap();
            }
        }
        root
    }

    fn folder_experiment(dir: &Path) -> ExperimentConfig {
        ExperimentConfig {
            name: "tiny".to_string(),
            source: DataSource::ImageFolder {
                root: image_folder(dir),
                extensions: vec!["jpg".to_string()],
                class_intensity: ClassIntensity::None,
            },
            backbone: BackboneKind::Vgg16,
            image_size: 32,
            backbone_weights: None,
            capsules: Default::default(),
            oversample: Some(OversampleConfig {
                strategy: SamplingStrategy::from_pairs(&[(2, 10)]),
                k_neighbors: 5,
                seed: 42,
            }),
            split: Default::default(),
            training: TrainingConfig::debug(),
            output_dir: dir.join("result"),
        }
    }

    #[test]
    fn test_prepare_folder_data() {
        let dir = TempDir::new().unwrap();
        let config = folder_experiment(dir.path());
        let data = prepare_data(&config).unwrap();

        assert_eq!(data.class_names, vec!["ant", "bee", "cat"]);
        let total = data.train.len() + data.validation.len() + data.test.len();
        assert_eq!(total, 12 + 8 + 10);
        assert_eq!(data.train.class_counts(), vec![8, 6, 7]);
        assert!(!data.test.is_empty());
    }

    /// One CIFAR-10 record whose pixels all equal `fill`
    fn cifar_record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(3 * 32 * 32));
        bytes
    }

    /// Five training batches of classes 0-3 and a three-image test batch.
    /// Every training image has its own fill value.
    fn cifar_dir(dir: &Path) -> PathBuf {
        let root = dir.join("cifar");
        std::fs::create_dir_all(&root).unwrap();
        for batch in 0..5u8 {
            let bytes: Vec<u8> = (0..4u8)
                .flat_map(|label| cifar_record(label, batch * 10 + label))
                .collect();
            std::fs::write(root.join(format!("data_batch_{}.bin", batch + 1)), bytes).unwrap();
        }
        let test: Vec<u8> = [(5u8, 200u8), (6, 201), (9, 202)]
            .iter()
            .flat_map(|&(label, fill)| cifar_record(label, fill))
            .collect();
        std::fs::write(root.join("test_batch.bin"), test).unwrap();
        root
    }

    fn fills(set: &ImageSet) -> Vec<u8> {
        set.images.iter().map(|img| (img[0] * 255.0).round() as u8).collect()
    }

    #[test]
    fn test_prepare_cifar_data() {
        let dir = TempDir::new().unwrap();
        let mut config = ExperimentConfig::vgg_cifar10();
        config.source = DataSource::Cifar10 {
            root: cifar_dir(dir.path()),
            validation_fraction: 0.2,
        };
        let data = prepare_data(&config).unwrap();

        assert_eq!(data.num_classes(), 10);
        assert_eq!(data.class_names[0], "airplane");
        assert_eq!(data.class_names[9], "truck");

        // 5 images per class, one of each held out for validation
        assert_eq!(data.train.len(), 16);
        assert_eq!(data.validation.len(), 4);
        assert_eq!(&data.train.class_counts()[..4], &[4, 4, 4, 4]);
        assert_eq!(&data.validation.class_counts()[..4], &[1, 1, 1, 1]);

        let mut seen = fills(&data.train);
        seen.extend(fills(&data.validation));
        seen.sort_unstable();
        let mut expected: Vec<u8> = (0..5u8)
            .flat_map(|batch| (0..4u8).map(move |label| batch * 10 + label))
            .collect();
        expected.sort_unstable();
        assert_eq!(seen, expected, "train and validation overlap or lose images");

        assert_eq!(data.test.labels, vec![5, 6, 9]);
        assert_eq!(fills(&data.test), vec![200, 201, 202]);
    }

    #[test]
    fn test_dataset_stats_with_strategy() {
        let dir = TempDir::new().unwrap();
        let stats = dataset_stats(&folder_experiment(dir.path())).unwrap();
        assert_eq!(stats.counts, vec![12, 8, 5]);
        assert_eq!(stats.resampled, Some(vec![12, 8, 10]));
    }

    #[test]
    fn test_run_and_evaluate_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = folder_experiment(dir.path());
        let device = Default::default();

        let report = run_experiment::<TestAutodiffBackend>(&config, device).unwrap();
        assert_eq!(report.history.len(), 2);
        assert_eq!(report.metrics.total_samples, 6);
        for file in [
            "log.csv",
            "config.json",
            "metrics.json",
            "confusion_matrix.csv",
            "confusion_matrix.svg",
            "accuracy.svg",
            "loss.svg",
        ] {
            assert!(report.output_dir.join(file).exists(), "missing {}", file);
        }

        let metrics =
            evaluate_checkpoint::<NdArray>(&report.output_dir, Default::default()).unwrap();
        assert_eq!(metrics.total_samples, 6);
    }

    #[test]
    fn test_evaluate_checkpoint_requires_metadata() {
        let dir = TempDir::new().unwrap();
        let result = evaluate_checkpoint::<NdArray>(dir.path(), Default::default());
        assert!(matches!(result, Err(CapsNetError::PathNotFound(_))));
    }
}
