// ============================================================
// Layer 2 - Sequence Forecaster
// ============================================================
// The neural implementation of `Forecaster`. Owns:
//
//   - the training configuration (device and precision included)
//   - the checkpoint store
//   - the active model, behind a ModelHandle
//   - a guard that admits one training run at a time
//
// Readers clone an `Arc` of the active inferencer under a read
// lock and predict without holding it. A finished training run or
// a checkpoint load builds a new inferencer first and then swaps
// it in under the write lock, so a reader sees the old model or
// the new one, never a mix.

use std::sync::Arc;

use burn::{prelude::*, tensor::backend::AutodiffBackend};
use chrono::Local;
use parking_lot::{Mutex, RwLock};

use crate::application::train_use_case::TrainConfig;
use crate::data::{splitter::split_train_val, windower::Windower};
use crate::domain::error::ForecastError;
use crate::domain::history::TrainingHistory;
use crate::domain::observation::{FeatureVector, Observation};
use crate::domain::prediction::{Prediction, PredictionRequest};
use crate::domain::traits::Forecaster;
use crate::infra::checkpoint::CheckpointStore;
use crate::ml::inferencer::Inferencer;
use crate::ml::trainer::{run_training, TrainingData};

// ─── ModelHandle ──────────────────────────────────────────────────────────────
/// The active model, swappable atomically.
pub struct ModelHandle<B: Backend> {
    slot: RwLock<Option<Arc<Inferencer<B>>>>,
}

impl<B: Backend> Default for ModelHandle<B> {
    fn default() -> Self {
        Self { slot: RwLock::new(None) }
    }
}

impl<B: Backend> ModelHandle<B> {
    pub fn current(&self) -> Result<Arc<Inferencer<B>>, ForecastError> {
        self.slot.read().clone().ok_or(ForecastError::ModelUnavailable)
    }

    /// Install `next` and return the model it replaced.
    pub fn swap(&self, next: Inferencer<B>) -> Option<Arc<Inferencer<B>>> {
        self.slot.write().replace(Arc::new(next))
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().is_some()
    }
}

// ─── SequenceForecaster ───────────────────────────────────────────────────────
pub struct SequenceForecaster<B: AutodiffBackend> {
    config:   TrainConfig,
    device:   B::Device,
    store:    CheckpointStore,
    active:   ModelHandle<B::InnerBackend>,
    training: Mutex<()>,
}

impl<B: AutodiffBackend> SequenceForecaster<B> {
    pub fn new(config: TrainConfig, device: B::Device) -> Result<Self, ForecastError> {
        config.validate()?;
        let store = CheckpointStore::new(&config.checkpoint_dir);
        Ok(Self {
            config,
            device,
            store,
            active:   ModelHandle::default(),
            training: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Epoch the active weights come from.
    pub fn active_epoch(&self) -> Option<usize> {
        self.active.current().ok().and_then(|m| m.epoch())
    }

    fn prepare(&self, observations: &[Observation]) -> Result<TrainingData, ForecastError> {
        let windower = Windower::new(self.config.sequence_length)?;
        let table    = windower.fit(observations)?;
        if table.samples.is_empty() {
            return Err(windower.insufficient(observations.len()));
        }

        let total = table.samples.len();
        let (mut train, mut valid) = split_train_val(
            table.samples,
            1.0 - self.config.validation_fraction,
            self.config.seed,
        );
        if train.is_empty() {
            std::mem::swap(&mut train, &mut valid);
        }
        if valid.is_empty() {
            tracing::warn!(
                "Only {} windows: validating on the training windows",
                total
            );
            valid = train.clone();
        }

        Ok(TrainingData {
            train,
            valid,
            scaler:          table.scaler,
            sequence_length: windower.sequence_length(),
            recent_context:  table.recent_context,
        })
    }
}

impl<B: AutodiffBackend> Forecaster for SequenceForecaster<B> {
    fn train(&self, observations: &[Observation]) -> Result<TrainingHistory, ForecastError> {
        let _guard = self.training.try_lock().ok_or(ForecastError::TrainingInProgress)?;

        let data     = self.prepare(observations)?;
        let scaler   = data.scaler.clone();
        let context  = data.recent_context.clone();
        let windower = Windower::new(data.sequence_length)?;

        let outcome = run_training::<B>(&self.config, data, &self.store, &self.device)?;

        let inferencer = Inferencer::new(outcome.model, scaler, windower, context, self.device.clone())
            .with_epoch(outcome.epoch);
        self.active.swap(inferencer);
        tracing::info!("Active model is now epoch {:?}", outcome.epoch);

        Ok(outcome.history)
    }

    fn predict(&self, request: &PredictionRequest) -> Result<Prediction, ForecastError> {
        let model = self.active.current()?;
        let live  = FeatureVector::from_context(
            Local::now().date_naive(),
            request.location_lat,
            request.location_long,
            request.weather_temp,
            request.weather_humidity,
            request.weather_wind_speed,
        );
        model.predict_live(live)
    }

    fn predict_recent(&self, observations: &[Observation]) -> Result<Prediction, ForecastError> {
        self.active.current()?.predict_recent(observations)
    }

    fn load_checkpoint(&self, name: &str) -> Result<bool, ForecastError> {
        let Some(checkpoint) = self.store.load::<B::InnerBackend>(name, &self.device)? else {
            return Ok(false);
        };
        let inferencer = Inferencer::from_checkpoint(checkpoint, self.device.clone())?;
        self.active.swap(inferencer);
        Ok(true)
    }

    fn is_ready(&self) -> bool {
        self.active.is_loaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::windower::tests::synthetic_table;
    use crate::domain::history::StopReason;
    use crate::infra::checkpoint::BEST;
    use crate::ml::precision::Precision;
    use crate::ml::CpuTrainBackend;

    fn small_config(dir: &std::path::Path) -> TrainConfig {
        TrainConfig {
            checkpoint_dir:          dir.to_string_lossy().into_owned(),
            sequence_length:         30,
            max_epochs:              40,
            batch_size:              4,
            learning_rate:           0.02,
            weight_decay:            0.0,
            hidden_dim:              16,
            num_layers:              1,
            dropout:                 0.0,
            early_stopping_patience: 50,
            precision:               Precision::Mixed,
            ..Default::default()
        }
    }

    fn forecaster(cfg: TrainConfig) -> SequenceForecaster<CpuTrainBackend> {
        SequenceForecaster::new(cfg, Default::default()).unwrap()
    }

    fn request() -> PredictionRequest {
        PredictionRequest {
            location_lat:       37.9,
            location_long:      -122.42,
            weather_temp:       89.0,
            weather_humidity:   41.0,
            weather_wind_speed: 9.0,
        }
    }

    #[test]
    fn test_fresh_forecaster_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let f   = forecaster(small_config(dir.path()));
        assert!(!f.is_ready());
        assert_eq!(f.predict(&request()).unwrap_err().condition(), "model_unavailable");
        assert_eq!(
            f.predict_recent(&synthetic_table(40)).unwrap_err().condition(),
            "model_unavailable"
        );
    }

    #[test]
    fn test_table_of_exactly_l_rows_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        let f   = forecaster(small_config(dir.path()));
        let err = f.train(&synthetic_table(30)).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientHistory { rows: 30, sequence_length: 30 }));
        assert!(!f.is_ready());
    }

    #[test]
    fn test_learns_rising_severity_end_to_end() {
        let dir   = tempfile::tempdir().unwrap();
        let f     = forecaster(small_config(dir.path()));
        let table = synthetic_table(40);

        let history = f.train(&table).unwrap();
        assert!(!history.epochs.is_empty());
        assert!(history.epochs.iter().all(|e| e.train_loss.is_finite() && e.val_loss.is_finite()));
        assert!(f.is_ready());

        let p = f.predict_recent(&table).unwrap();
        assert!(p.severity > 0.5, "severity {} should sit nearer 0.9 than 0.1", p.severity);
        assert!(p.type_probabilities.iter().all(|v| (0.0..=1.0).contains(v)));

        let live = f.predict(&request()).unwrap();
        assert!((0.0..=1.0).contains(&live.severity));

        // best checkpoint reloads into a second forecaster with the same outputs
        let g = forecaster(small_config(dir.path()));
        assert!(g.load_checkpoint(BEST).unwrap());
        assert_eq!(g.active_epoch(), history.best_epoch);
        assert_eq!(g.predict_recent(&table).unwrap(), p);
    }

    #[test]
    fn test_zero_learning_rate_stops_early_on_first_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            learning_rate:           0.0,
            early_stopping_patience: 2,
            max_epochs:              10,
            ..small_config(dir.path())
        };
        let f = forecaster(cfg);
        let history = f.train(&synthetic_table(40)).unwrap();

        assert_eq!(history.stop_reason, StopReason::EarlyStopped);
        assert_eq!(history.last_epoch(), Some(3));
        assert_eq!(history.best_epoch, Some(1));
        assert_eq!(f.store().manifest(BEST).unwrap().unwrap().epoch, 1);
        assert_eq!(f.active_epoch(), Some(1));
    }

    #[test]
    fn test_resume_continues_after_saved_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig { max_epochs: 2, ..small_config(dir.path()) };
        forecaster(cfg.clone()).train(&synthetic_table(40)).unwrap();

        let resumed = TrainConfig {
            max_epochs:  4,
            resume_from: Some("latest".to_string()),
            ..cfg
        };
        let history = forecaster(resumed).train(&synthetic_table(40)).unwrap();
        let epochs: Vec<usize> = history.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![3, 4]);
    }

    #[test]
    fn test_resume_from_missing_checkpoint_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig { resume_from: Some("nowhere".to_string()), ..small_config(dir.path()) };
        let err = forecaster(cfg).train(&synthetic_table(40)).unwrap_err();
        assert_eq!(err.condition(), "checkpoint_absent");
    }

    #[test]
    fn test_second_concurrent_train_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let f   = forecaster(small_config(dir.path()));
        let _held = f.training.lock();
        assert_eq!(
            f.train(&synthetic_table(40)).unwrap_err().condition(),
            "training_in_progress"
        );
    }

    #[test]
    fn test_scaled_window_prediction_after_training() {
        let dir = tempfile::tempdir().unwrap();
        let f   = forecaster(TrainConfig { max_epochs: 1, ..small_config(dir.path()) });
        f.train(&synthetic_table(40)).unwrap();

        let window = vec![vec![0.0f32; crate::domain::observation::FEATURE_DIM]; 30];
        let active = f.active.current().unwrap();
        let p = active.predict_scaled(&window).unwrap();
        assert!((0.0..=1.0).contains(&p.severity));
        assert_eq!(
            active.predict_scaled(&[vec![0.0f32; 3]]).unwrap_err().condition(),
            "invalid_window"
        );
    }

    #[test]
    fn test_missing_checkpoint_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let f   = forecaster(small_config(dir.path()));
        assert!(!f.load_checkpoint(BEST).unwrap());
        assert!(!f.is_ready());
    }
}
