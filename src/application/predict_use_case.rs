// ============================================================
// Layer 2 - PredictUseCase
// ============================================================
// Load a named checkpoint, predict and attach reasoning and
// recommendations. The network reads either the live row appended
// to the checkpoint's stored context, or, when an observation table
// is given, that table's most recent rows. Reasoning always comes
// from the live request.

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;

use crate::application::advisor;
use crate::application::backend::{dispatch, BackendTask};
use crate::application::forecaster::SequenceForecaster;
use crate::application::train_use_case::TrainConfig;
use crate::data::loader::CsvObservationLoader;
use crate::domain::error::ForecastError;
use crate::domain::observation::Observation;
use crate::domain::prediction::{PredictionRequest, PredictionResponse};
use crate::domain::traits::{Forecaster, ObservationSource};
use crate::ml::precision::Precision;
use crate::ml::DeviceKind;

pub struct PredictUseCase {
    checkpoint_dir: String,
    checkpoint:     String,
    device:         DeviceKind,
    recent:         Option<String>,
}

impl PredictUseCase {
    pub fn new(checkpoint_dir: impl Into<String>, checkpoint: impl Into<String>, device: DeviceKind) -> Self {
        Self { checkpoint_dir: checkpoint_dir.into(), checkpoint: checkpoint.into(), device, recent: None }
    }

    /// Predict from the most recent rows of this observation CSV.
    pub fn with_recent(mut self, path: Option<String>) -> Self {
        self.recent = path;
        self
    }

    pub fn execute(&self, request: PredictionRequest) -> Result<PredictionResponse> {
        let recent = match &self.recent {
            Some(path) => Some(CsvObservationLoader::new(path).load_all()?),
            None => None,
        };
        let task = PredictTask {
            config: TrainConfig {
                checkpoint_dir: self.checkpoint_dir.clone(),
                device:         self.device,
                ..Default::default()
            },
            checkpoint: &self.checkpoint,
            request,
            recent,
        };
        // Inference never scales losses; full precision picks the f32 backend.
        dispatch(self.device, Precision::Full, task)
            .with_context(|| format!("Prediction from checkpoint '{}' failed", self.checkpoint))
    }
}

struct PredictTask<'a> {
    config:     TrainConfig,
    checkpoint: &'a str,
    request:    PredictionRequest,
    recent:     Option<Vec<Observation>>,
}

impl BackendTask for PredictTask<'_> {
    type Output = PredictionResponse;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<PredictionResponse, ForecastError> {
        let forecaster = SequenceForecaster::<B>::new(self.config, device)?;
        if !forecaster.load_checkpoint(self.checkpoint)? {
            tracing::warn!("No checkpoint named '{}'", self.checkpoint);
        }
        if !forecaster.is_ready() {
            return Err(ForecastError::ModelUnavailable);
        }
        let prediction = match &self.recent {
            Some(table) => forecaster.predict_recent(table)?,
            None => forecaster.predict(&self.request)?,
        };
        Ok(advisor::respond(&self.request, &prediction))
    }
}
