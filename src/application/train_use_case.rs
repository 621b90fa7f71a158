// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates a training run end to end:
//
//   Step 1: Load the observation CSV        (Layer 4 - data)
//   Step 2: Build the forecaster on the
//           configured device/precision     (Layer 5 - ml)
//   Step 3: Window, split, train, swap in   (Layer 2 - forecaster)
//           the best weights
//
// Checkpoints and metrics land in `checkpoint_dir` as a side
// effect of step 3.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::backend::{dispatch, BackendTask};
use crate::application::forecaster::SequenceForecaster;
use crate::data::loader::CsvObservationLoader;
use crate::domain::error::ForecastError;
use crate::domain::history::TrainingHistory;
use crate::domain::observation::Observation;
use crate::domain::traits::{Forecaster, ObservationSource};
use crate::ml::model::EmergencyPredictorConfig;
use crate::ml::precision::Precision;
use crate::ml::DeviceKind;

use burn::tensor::backend::AutodiffBackend;

// ─── Training Configuration ──────────────────────────────────────────────────
// Every knob of a run. Serialisable so a run's settings can be
// printed or stored next to its checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub checkpoint_dir:          String,
    pub sequence_length:         usize,
    pub max_epochs:              usize,
    pub batch_size:              usize,
    pub learning_rate:           f64,
    pub weight_decay:            f64,
    pub hidden_dim:              usize,
    pub num_layers:              usize,
    pub num_heads:               usize,
    pub dropout:                 f64,
    pub scheduler_factor:        f64,
    pub scheduler_patience:      usize,
    pub min_learning_rate:       f64,
    pub early_stopping_patience: usize,
    pub validation_fraction:     f64,
    pub seed:                    u64,
    pub checkpoint_interval:     usize,
    /// Consecutive non-finite batch losses tolerated before failing.
    pub max_bad_batches:         usize,
    pub precision:               Precision,
    pub device:                  DeviceKind,
    pub resume_from:             Option<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir:          "checkpoints".to_string(),
            sequence_length:         30,
            max_epochs:              50,
            batch_size:              32,
            learning_rate:           1e-3,
            weight_decay:            0.01,
            hidden_dim:              128,
            num_layers:              2,
            num_heads:               4,
            dropout:                 0.2,
            scheduler_factor:        0.5,
            scheduler_patience:      5,
            min_learning_rate:       0.0,
            early_stopping_patience: 10,
            validation_fraction:     0.2,
            seed:                    42,
            checkpoint_interval:     1,
            max_bad_batches:         10,
            precision:               Precision::Mixed,
            device:                  DeviceKind::Cpu,
            resume_from:             None,
        }
    }
}

impl TrainConfig {
    pub fn model_config(&self) -> EmergencyPredictorConfig {
        EmergencyPredictorConfig::for_features(self.hidden_dim, self.num_layers)
            .with_num_heads(self.num_heads)
            .with_dropout(self.dropout)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let invalid = |msg: &str| Err(ForecastError::InvalidConfig(msg.to_string()));
        if self.sequence_length == 0 {
            return invalid("sequence_length must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.max_epochs == 0 {
            return invalid("max_epochs must be at least 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return invalid("learning_rate must be a non-negative number");
        }
        if !(self.scheduler_factor > 0.0 && self.scheduler_factor < 1.0) {
            return invalid("scheduler_factor must be in (0, 1)");
        }
        if self.early_stopping_patience == 0 {
            return invalid("early_stopping_patience must be at least 1");
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return invalid("validation_fraction must be in [0, 1)");
        }
        if self.checkpoint_interval == 0 {
            return invalid("checkpoint_interval must be at least 1");
        }
        self.model_config().validate()
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config:    TrainConfig,
    data_path: String,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig, data_path: impl Into<String>) -> Self {
        Self { config, data_path: data_path.into() }
    }

    pub fn execute(&self) -> Result<TrainingHistory> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1: Load observations ─────────────────────────────────────────
        let loader = CsvObservationLoader::new(&self.data_path);
        tracing::info!("Loading observations from '{}'", loader.path().display());
        let observations = loader.load_all()?;
        tracing::info!("Loaded {} observations", observations.len());

        // ── Steps 2 and 3: Train on the configured backend ────────────────────
        let task = TrainTask { config: cfg.clone(), observations: &observations };
        let history = dispatch(cfg.device, cfg.precision, task)
            .with_context(|| format!("Training on '{}' failed", self.data_path))?;

        tracing::info!(
            "Training complete: {} epochs, best epoch {:?}",
            history.epochs.len(),
            history.best_epoch
        );
        Ok(history)
    }
}

struct TrainTask<'a> {
    config:       TrainConfig,
    observations: &'a [Observation],
}

impl BackendTask for TrainTask<'_> {
    type Output = TrainingHistory;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainingHistory, ForecastError> {
        let forecaster = SequenceForecaster::<B>::new(self.config, device)?;
        forecaster.train(self.observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        let bad = [
            TrainConfig { sequence_length: 0, ..Default::default() },
            TrainConfig { batch_size: 0, ..Default::default() },
            TrainConfig { scheduler_factor: 1.0, ..Default::default() },
            TrainConfig { validation_fraction: 1.0, ..Default::default() },
            TrainConfig { num_heads: 3, ..Default::default() },
            TrainConfig { learning_rate: f64::NAN, ..Default::default() },
        ];
        for cfg in bad {
            assert_eq!(cfg.validate().unwrap_err().condition(), "invalid_config", "{cfg:?}");
        }
    }

    #[test]
    fn test_missing_csv_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            checkpoint_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let err = TrainUseCase::new(cfg, dir.path().join("absent.csv").to_string_lossy())
            .execute()
            .unwrap_err();
        assert!(format!("{err:#}").contains("absent.csv"));
    }
}
