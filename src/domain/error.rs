// ============================================================
// Layer 3 - Error Taxonomy
// ============================================================
// Every failure the forecaster can report to a caller. Each
// variant carries a stable condition tag so the serving
// boundary can emit `{condition, message}` instead of a trace.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    /// Not enough rows to fill a single window.
    #[error("insufficient history: {rows} rows cannot fill a window of {sequence_length} plus a label")]
    InsufficientHistory { rows: usize, sequence_length: usize },

    /// Prediction requested before any weights were trained or loaded.
    #[error("model unavailable: train the forecaster or load a checkpoint first")]
    ModelUnavailable,

    #[error("checkpoint '{0}' does not exist")]
    CheckpointAbsent(String),

    /// Present on disk but unreadable or inconsistent. Never retried.
    #[error("checkpoint '{name}' is corrupt: {reason}")]
    CheckpointCorrupt { name: String, reason: String },

    #[error(
        "training failed at epoch {epoch}: {reason} (last good checkpoint: {})",
        display_checkpoint(.last_checkpoint)
    )]
    TrainingFailed {
        epoch:           usize,
        reason:          String,
        last_checkpoint: Option<PathBuf>,
    },

    #[error("a training run is already in progress on this forecaster")]
    TrainingInProgress,

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("invalid window: {0}")]
    InvalidWindow(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    /// Machine-readable condition tag.
    pub fn condition(&self) -> &'static str {
        match self {
            ForecastError::InsufficientHistory { .. } => "insufficient_history",
            ForecastError::ModelUnavailable           => "model_unavailable",
            ForecastError::CheckpointAbsent(_)        => "checkpoint_absent",
            ForecastError::CheckpointCorrupt { .. }   => "checkpoint_corrupt",
            ForecastError::TrainingFailed { .. }      => "training_failed",
            ForecastError::TrainingInProgress         => "training_in_progress",
            ForecastError::InvalidObservation(_)      => "invalid_observation",
            ForecastError::InvalidWindow(_)           => "invalid_window",
            ForecastError::InvalidConfig(_)           => "invalid_config",
            ForecastError::Io(_)                      => "io",
        }
    }

    pub fn corrupt(name: impl Into<String>, reason: impl ToString) -> Self {
        ForecastError::CheckpointCorrupt { name: name.into(), reason: reason.to_string() }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody { condition: self.condition(), message: self.to_string() }
    }
}

fn display_checkpoint(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// What the serving boundary shows a caller.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub condition: &'static str,
    pub message:   String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_tags_are_distinct_for_absent_and_corrupt() {
        let absent  = ForecastError::CheckpointAbsent("best".into());
        let corrupt = ForecastError::corrupt("best", "truncated manifest");
        assert_ne!(absent.condition(), corrupt.condition());
        assert_eq!(corrupt.to_body().condition, "checkpoint_corrupt");
        assert!(corrupt.to_body().message.contains("truncated manifest"));
    }

    #[test]
    fn test_training_failed_names_last_checkpoint() {
        let err = ForecastError::TrainingFailed {
            epoch:           3,
            reason:          "non-finite loss".into(),
            last_checkpoint: Some(PathBuf::from("checkpoints/best")),
        };
        assert!(err.to_string().contains("checkpoints/best"));
    }
}
