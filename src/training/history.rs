//! Per-epoch training history and its CSV log

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CapsNetError, Result};

/// Column order of `log.csv`
pub const CSV_HEADER: [&str; 6] = ["epoch", "accuracy", "loss", "val_accuracy", "val_loss", "lr"];

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Training accuracy in [0, 1]
    pub accuracy: f64,
    pub loss: f64,
    /// Validation accuracy in [0, 1]
    pub val_accuracy: f64,
    pub val_loss: f64,
    /// Learning rate used during the epoch
    pub lr: f64,
}

/// All epochs of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub records: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Epoch with the highest validation accuracy; earliest wins ties
    pub fn best(&self) -> Option<&EpochRecord> {
        self.records.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }

    /// Render as CSV text
    pub fn to_csv(&self) -> String {
        let mut csv = CSV_HEADER.join(",");
        csv.push('\n');
        for r in &self.records {
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                r.epoch, r.accuracy, r.loss, r.val_accuracy, r.val_loss, r.lr
            ));
        }
        csv
    }

    /// Write the full history, replacing any previous file
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_csv())?;
        Ok(())
    }

    /// Parse a CSV log; columns are matched by header name in any order
    ///
    /// `lr` is optional and defaults to 0.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| CapsNetError::InvalidInput("empty training log".into()))?;

        let columns: HashMap<&str, usize> = header
            .split(',')
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let column = |name: &str| {
            columns.get(name).copied().ok_or_else(|| {
                CapsNetError::InvalidInput(format!("training log has no '{}' column", name))
            })
        };

        let epoch_col = column("epoch")?;
        let acc_col = column("accuracy")?;
        let loss_col = column("loss")?;
        let val_acc_col = column("val_accuracy")?;
        let val_loss_col = column("val_loss")?;
        let lr_col = columns.get("lr").copied();

        let mut records = Vec::new();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let float = |col: usize| -> Result<f64> {
                fields
                    .get(col)
                    .and_then(|v| v.parse::<f64>().ok())
                    .ok_or_else(|| {
                        CapsNetError::InvalidInput(format!(
                            "bad value in column {} on data line {}",
                            col,
                            line_no + 1
                        ))
                    })
            };

            records.push(EpochRecord {
                epoch: float(epoch_col)? as usize,
                accuracy: float(acc_col)?,
                loss: float(loss_col)?,
                val_accuracy: float(val_acc_col)?,
                val_loss: float(val_loss_col)?,
                lr: match lr_col {
                    Some(col) => float(col)?,
                    None => 0.0,
                },
            });
        }

        Ok(Self { records })
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CapsNetError::PathNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_csv(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize, val_accuracy: f64) -> EpochRecord {
        EpochRecord {
            epoch,
            accuracy: 0.5,
            loss: 1.25,
            val_accuracy,
            val_loss: 1.5,
            lr: 0.0002,
        }
    }

    #[test]
    fn test_best_prefers_earliest_tie() {
        let mut history = TrainingHistory::new();
        history.push(record(0, 0.4));
        history.push(record(1, 0.7));
        history.push(record(2, 0.7));
        assert_eq!(history.best().map(|r| r.epoch), Some(1));
    }

    #[test]
    fn test_csv_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("result").join("log.csv");

        let mut history = TrainingHistory::new();
        history.push(record(0, 0.25));
        history.push(record(1, 0.5));
        history.save_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("epoch,accuracy,loss,val_accuracy,val_loss,lr\n"));

        let loaded = TrainingHistory::load_csv(&path).unwrap();
        assert_eq!(loaded.records, history.records);
    }

    #[test]
    fn test_reads_reordered_columns_without_lr() {
        let text = "epoch,val_loss,loss,accuracy,val_accuracy\n0,0.9,1.1,0.6,0.55\n";
        let history = TrainingHistory::from_csv(text).unwrap();
        let r = &history.records[0];
        assert_eq!(r.val_loss, 0.9);
        assert_eq!(r.accuracy, 0.6);
        assert_eq!(r.lr, 0.0);
    }

    #[test]
    fn test_rejects_missing_column_and_bad_value() {
        assert!(TrainingHistory::from_csv("epoch,loss\n0,1.0\n").is_err());
        let bad = "epoch,accuracy,loss,val_accuracy,val_loss\n0,x,1,1,1\n";
        assert!(TrainingHistory::from_csv(bad).is_err());
        assert!(TrainingHistory::from_csv("").is_err());
    }
}
