//! Metrics Module for Model Evaluation
//!
//! One-vs-rest statistics derived from a multi-class confusion matrix:
//! - TP / FP / FN / TN per class
//! - Precision, sensitivity, specificity, NPV, fall-out, miss rate, FDR
//! - F-score per class, overall accuracy and macro averages

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Divide, mapping an empty denominator to 0.0 rather than NaN
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row = actual, column = predicted, stored row-major
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build from parallel slices of predicted and actual labels
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Record one prediction. Out-of-range labels are ignored.
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct() as f64, self.total() as f64)
    }

    /// Actual class counts
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predicted class counts
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Largest single cell, used to scale heat-map colours
    pub fn max_cell(&self) -> usize {
        self.matrix.iter().copied().max().unwrap_or(0)
    }

    /// Save to CSV with class names as row and column headers
    pub fn save_csv(&self, path: &Path, class_names: &[String]) -> std::io::Result<()> {
        let name = |i: usize| class_names.get(i).cloned().unwrap_or_else(|| i.to_string());

        let mut content = String::from("actual\\predicted");
        for col in 0..self.num_classes {
            content.push(',');
            content.push_str(&name(col));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            content.push_str(&name(row));
            for col in 0..self.num_classes {
                let _ = write!(content, ",{}", self.get(row, col));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

/// One-vs-rest statistics for a single class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: String,

    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,

    /// PPV = TP / (TP + FP)
    pub precision: f64,
    /// TPR = TP / (TP + FN)
    pub sensitivity: f64,
    /// TNR = TN / (TN + FP)
    pub specificity: f64,
    /// NPV = TN / (TN + FN)
    pub negative_predictive_value: f64,
    /// FPR = FP / (FP + TN)
    pub fall_out: f64,
    /// FNR = FN / (TP + FN)
    pub miss_rate: f64,
    /// FDR = FP / (TP + FP)
    pub false_discovery_rate: f64,
    /// 2 * PPV * TPR / (PPV + TPR)
    pub f_score: f64,

    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from the confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, class_name: &str) -> Self {
        let tp = cm.get(class_idx, class_idx);
        let fp = cm.col_sums()[class_idx] - tp;
        let fn_ = cm.row_sums()[class_idx] - tp;
        let tn = cm.total() - tp - fp - fn_;

        let (tpf, fpf, fnf, tnf) = (tp as f64, fp as f64, fn_ as f64, tn as f64);

        let precision = ratio(tpf, tpf + fpf);
        let sensitivity = ratio(tpf, tpf + fnf);

        Self {
            class_idx,
            class_name: class_name.to_string(),
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            true_negatives: tn,
            precision,
            sensitivity,
            specificity: ratio(tnf, tnf + fpf),
            negative_predictive_value: ratio(tnf, tnf + fnf),
            fall_out: ratio(fpf, fpf + tnf),
            miss_rate: ratio(fnf, tpf + fnf),
            false_discovery_rate: ratio(fpf, tpf + fpf),
            f_score: ratio(2.0 * precision * sensitivity, precision + sensitivity),
            support: tp + fn_,
        }
    }
}

/// Evaluation summary over a held-out set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_sensitivity: f64,
    pub macro_specificity: f64,
    pub macro_f_score: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Compute all metrics from argmax predictions.
    ///
    /// `class_names.len()` fixes the number of classes.
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], class_names: &[String]) -> Self {
        let num_classes = class_names.len();
        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx, name))
            .collect();

        let mean = |f: fn(&ClassMetrics) -> f64| {
            if per_class.is_empty() {
                0.0
            } else {
                per_class.iter().map(f).sum::<f64>() / per_class.len() as f64
            }
        };

        Self {
            total_samples: confusion_matrix.total(),
            correct_predictions: confusion_matrix.correct(),
            accuracy: confusion_matrix.accuracy(),
            macro_precision: mean(|m| m.precision),
            macro_sensitivity: mean(|m| m.sensitivity),
            macro_specificity: mean(|m| m.specificity),
            macro_f_score: mean(|m| m.f_score),
            per_class,
            confusion_matrix,
        }
    }

    /// Tab-separated per-class table in the classic experiment-log layout
    pub fn performance_table(&self) -> String {
        let mut out = String::from(
            "\n\nClassName\tTP\tFP\tFN\tTN\tPrecision\tSensitivity\tSpecificity\tF-Score\n",
        );
        for m in &self.per_class {
            let _ = writeln!(
                out,
                "{}\t\t{}\t{}\t{}\t{}\t{:.4}\t\t{:.4}\t\t{:.4}\t\t{:.4}",
                m.class_name,
                m.true_positives,
                m.false_positives,
                m.false_negatives,
                m.true_negatives,
                m.precision,
                m.sensitivity,
                m.specificity,
                m.f_score
            );
        }
        out
    }

    /// Save as pretty JSON
    pub fn save_json(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Samples:            {}", self.total_samples)?;
        writeln!(f, "Accuracy:           {:.4}", self.accuracy)?;
        writeln!(f, "Macro precision:    {:.4}", self.macro_precision)?;
        writeln!(f, "Macro sensitivity:  {:.4}", self.macro_sensitivity)?;
        writeln!(f, "Macro specificity:  {:.4}", self.macro_specificity)?;
        write!(f, "Macro F-score:      {:.4}", self.macro_f_score)
    }
}

/// Running mean of a scalar, e.g. batch losses within an epoch
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` observed `weight` times
    pub fn update(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn mean(&self) -> f64 {
        ratio(self.sum, self.count as f64)
    }
}
