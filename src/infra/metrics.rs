// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Appends one CSV row per epoch to <checkpoint_dir>/metrics.csv.
//
//   epoch,train_loss,val_loss,learning_rate,skipped_batches
//   1,0.693102,0.690411,0.001,0
//   2,0.652871,0.661020,0.001,0
//
// The header is written only when the file is new, so a resumed
// run keeps appending to the same log.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use crate::domain::error::ForecastError;
use crate::domain::history::EpochLoss;

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ForecastError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let csv_path = dir.join("metrics.csv");
        tracing::debug!("Metrics log: '{}'", csv_path.display());
        Ok(Self { csv_path })
    }

    pub fn log(&self, row: &EpochLoss) -> Result<(), ForecastError> {
        let is_new = !self.csv_path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        writer.serialize(row).map_err(std::io::Error::other)?;
        writer.flush()?;

        tracing::debug!(
            "Logged epoch {}: train_loss={:.4}, val_loss={:.4}",
            row.epoch,
            row.train_loss,
            row.val_loss
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(epoch: usize, val_loss: f64) -> EpochLoss {
        EpochLoss { epoch, train_loss: 0.7, val_loss, learning_rate: 1e-3, skipped_batches: 0 }
    }

    #[test]
    fn test_header_written_once_across_loggers() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&row(1, 0.6)).unwrap();
        // a resumed run opens a fresh logger on the same file
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&row(2, 0.5)).unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,train_loss,val_loss,learning_rate,skipped_batches");
        assert!(lines[2].starts_with("2,"));
    }

    #[test]
    fn test_rows_read_back() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&row(1, 0.6)).unwrap();
        logger.log(&row(2, 0.4)).unwrap();

        let mut reader = csv::Reader::from_path(logger.csv_path()).unwrap();
        let rows: Vec<EpochLoss> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![row(1, 0.6), row(2, 0.4)]);
    }
}
