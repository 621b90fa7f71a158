// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The application layer talks to these traits, not to Burn
// types, so an alternate predictor (e.g. a tree model) can be
// swapped in by configuration without touching the serving code.

use anyhow::Result;

use crate::domain::error::ForecastError;
use crate::domain::observation::Observation;
use crate::domain::prediction::{Prediction, PredictionRequest};
use crate::domain::history::TrainingHistory;

// ─── ObservationSource ────────────────────────────────────────────────────────
/// Anything that can produce a time-ordered observation table.
///
/// Implementations:
///   - CsvObservationLoader → reads a CSV export
pub trait ObservationSource {
    fn load_all(&self) -> Result<Vec<Observation>>;
}

// ─── Forecaster ───────────────────────────────────────────────────────────────
/// The shared predictor capability: train, predict, persist.
///
/// Implementations:
///   - SequenceForecaster → BiLSTM + attention network
pub trait Forecaster {
    /// Fit on a time-ordered table and return the per-epoch loss history.
    fn train(&self, observations: &[Observation]) -> Result<TrainingHistory, ForecastError>;

    /// Predict from live context using the active model.
    fn predict(&self, request: &PredictionRequest) -> Result<Prediction, ForecastError>;

    /// Predict from the most recent window of a raw table.
    fn predict_recent(&self, observations: &[Observation]) -> Result<Prediction, ForecastError>;

    /// Make the named checkpoint the active model. `Ok(false)` means
    /// no such checkpoint exists.
    fn load_checkpoint(&self, name: &str) -> Result<bool, ForecastError>;

    fn is_ready(&self) -> bool;
}
