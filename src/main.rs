//! CapsNet Transfer CLI
//!
//! Trains and evaluates backbone + capsule-routing classifiers with the Burn
//! framework.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use capsnet_transfer::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use capsnet_transfer::dataset::ClassIntensity;
use capsnet_transfer::model::config::{DataSource, ExperimentConfig, Preset};
use capsnet_transfer::training::{dataset_stats, evaluate_checkpoint, run_experiment};
use capsnet_transfer::utils::charts::plot_log;
use capsnet_transfer::utils::logging::{init_logging, LogConfig};

/// Capsule-routing transfer-learning image classifiers
#[derive(Parser, Debug)]
#[command(name = "capsnet_transfer")]
#[command(version)]
#[command(about = "Backbone + capsule-routing image classifiers with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the experiment configuration comes from
#[derive(Args, Debug)]
struct ExperimentArgs {
    /// Built-in experiment
    #[arg(short, long, value_enum, default_value = "inception-images")]
    preset: Preset,

    /// JSON configuration file; overrides the preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset root (image folder or CIFAR-10 binary directory)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
}

impl ExperimentArgs {
    fn load(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)
                .with_context(|| format!("reading configuration {:?}", path))?,
            None => self.preset.config(),
        };
        if let Some(dir) = &self.data_dir {
            match &mut config.source {
                DataSource::ImageFolder { root, .. } | DataSource::Cifar10 { root, .. } => {
                    *root = dir.clone();
                }
            }
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model and report on the test set
    Train {
        #[command(flatten)]
        experiment: ExperimentArgs,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size for training
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Output directory for logs, checkpoints and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Burn record with pretrained backbone weights
        #[arg(long)]
        backbone_weights: Option<PathBuf>,

        /// Scale each image by (class index + 1) / number of classes
        #[arg(long, default_value = "false")]
        class_intensity: bool,

        /// Seed for shuffling batches
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show the class distribution, before and after oversampling
    Stats {
        #[command(flatten)]
        experiment: ExperimentArgs,
    },

    /// Render accuracy and loss charts from a training log
    Plot {
        /// Path to log.csv
        #[arg(default_value = "result/log.csv")]
        log: PathBuf,
    },

    /// Re-run the test report for a saved checkpoint
    Evaluate {
        /// Directory holding best_model.mpk and best_model.json
        #[arg(default_value = "result")]
        checkpoint_dir: PathBuf,
    },

    /// Write a preset configuration as JSON
    Config {
        #[arg(short, long, value_enum, default_value = "inception-images")]
        preset: Preset,

        /// Output file
        #[arg(short, long, default_value = "experiment.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            experiment,
            epochs,
            batch_size,
            learning_rate,
            output_dir,
            backbone_weights,
            class_intensity,
            seed,
        } => {
            let mut config = experiment.load()?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(lr) = learning_rate {
                config.training.learning_rate = lr;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if backbone_weights.is_some() {
                config.backbone_weights = backbone_weights;
            }
            if class_intensity {
                match &mut config.source {
                    DataSource::ImageFolder {
                        class_intensity, ..
                    } => *class_intensity = ClassIntensity::ByClassIndex,
                    DataSource::Cifar10 { .. } => {
                        anyhow::bail!("--class-intensity only applies to image folders")
                    }
                }
            }
            cmd_train(&config)?;
        }

        Commands::Stats { experiment } => {
            let config = experiment.load()?;
            dataset_stats(&config)?.print();
        }

        Commands::Plot { log } => cmd_plot(&log)?,

        Commands::Evaluate { checkpoint_dir } => {
            info!("Evaluating checkpoint in {:?}", checkpoint_dir);
            let metrics = evaluate_checkpoint::<DefaultBackend>(&checkpoint_dir, default_device())?;
            println!("{}", "Evaluation complete".green().bold());
            println!("  Macro F-score: {:.4}", metrics.macro_f_score);
        }

        Commands::Config { preset, output } => {
            preset.config().save(&output)?;
            println!("{} {:?}", "Wrote".green(), output);
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   CapsNet Transfer
   Backbone + capsule-routing classifiers with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}

fn cmd_train(config: &ExperimentConfig) -> Result<()> {
    config.validate()?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Experiment:     {}", config.name);
    println!("  Backbone:       {}", config.backbone);
    println!("  Image size:     {}px", config.image_size);
    println!("  Epochs:         {}", config.training.epochs);
    println!("  Batch size:     {}", config.training.batch_size);
    println!("  Learning rate:  {}", config.training.learning_rate);
    println!("  Oversampling:   {}", config.oversample.is_some());
    println!("  Output:         {:?}", config.output_dir);
    println!("  Backend:        {}", backend_name());
    println!();

    let report = run_experiment::<TrainingBackend>(config, default_device())?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Test accuracy:  {:.4}", report.metrics.accuracy);
    if let Some(best) = report.history.best() {
        println!(
            "  Best epoch:     {} (val_accuracy {:.4})",
            best.epoch + 1,
            best.val_accuracy
        );
    }
    println!("  Results in:     {:?}", report.output_dir);
    Ok(())
}

fn cmd_plot(log: &Path) -> Result<()> {
    let charts = plot_log(log).with_context(|| format!("plotting {:?}", log))?;
    for chart in charts {
        println!("{} {:?}", "Wrote".green(), chart);
    }
    Ok(())
}
