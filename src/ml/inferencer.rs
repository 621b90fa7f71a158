// ============================================================
// Layer 5 - Inferencer
// ============================================================
// Forward-only prediction outside the training loop. Holds the
// network on the non-autodiff backend (dropout inactive) along
// with the scaler and recent context it was trained with.
//
// Three ways in:
//   predict_scaled - one already-scaled window
//   predict_recent - a raw table; the last L rows are used
//   predict_live   - one live feature row appended to the
//                    recent training context
//
// The last two scale their rows and go through predict_scaled.
use burn::prelude::*;

use crate::data::{batcher::single_window, scaler::FeatureScaler, windower::Windower};
use crate::domain::error::ForecastError;
use crate::domain::observation::{FeatureVector, Observation, FEATURE_DIM};
use crate::domain::prediction::Prediction;
use crate::infra::checkpoint::Checkpoint;
use crate::ml::model::EmergencyPredictor;

#[derive(Debug)]
pub struct Inferencer<B: Backend> {
    model:          EmergencyPredictor<B>,
    scaler:         FeatureScaler,
    windower:       Windower,
    recent_context: Vec<FeatureVector>,
    /// Epoch the weights come from, if known.
    epoch:          Option<usize>,
    device:         B::Device,
}

impl<B: Backend> Inferencer<B> {
    pub fn new(
        model:          EmergencyPredictor<B>,
        scaler:         FeatureScaler,
        windower:       Windower,
        recent_context: Vec<FeatureVector>,
        device:         B::Device,
    ) -> Self {
        Self { model, scaler, windower, recent_context, epoch: None, device }
    }

    pub fn from_checkpoint(checkpoint: Checkpoint<B>, device: B::Device) -> Result<Self, ForecastError> {
        let manifest = checkpoint.manifest;
        let windower = Windower::new(manifest.sequence_length)?;
        tracing::debug!(
            "Serving checkpoint '{}' from '{}' (L={})",
            checkpoint.name,
            checkpoint.path.display(),
            manifest.sequence_length
        );
        Ok(Self {
            model:          checkpoint.model,
            scaler:         manifest.scaler,
            windower,
            recent_context: manifest.recent_context,
            epoch:          Some(manifest.epoch),
            device,
        })
    }

    pub fn with_epoch(mut self, epoch: Option<usize>) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn sequence_length(&self) -> usize {
        self.windower.sequence_length()
    }

    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }

    /// Predict from a window whose rows are already scaled.
    pub fn predict_scaled<R: AsRef<[f32]>>(&self, window: &[R]) -> Result<Prediction, ForecastError> {
        if window.is_empty() {
            return Err(ForecastError::InvalidWindow("window has no rows".to_string()));
        }
        let rows = window
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let row = row.as_ref();
                <[f32; FEATURE_DIM]>::try_from(row).map_err(|_| {
                    ForecastError::InvalidWindow(format!(
                        "row {i} has {} features, expected {FEATURE_DIM}",
                        row.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.run(&rows)
    }

    /// Predict what follows the last `sequence_length` rows of `observations`.
    pub fn predict_recent(&self, observations: &[Observation]) -> Result<Prediction, ForecastError> {
        let recent = self.windower.most_recent(observations)?;
        let raw: Vec<[f32; FEATURE_DIM]> = recent.iter().map(|o| o.features().to_array()).collect();
        self.predict_scaled(self.scaler.transform(&raw).as_slice())
    }

    /// Predict from one live feature row placed after the recent context.
    ///
    /// The window is the last `sequence_length` rows of context + live;
    /// with a shorter context the window is shorter too.
    pub fn predict_live(&self, live: FeatureVector) -> Result<Prediction, ForecastError> {
        let keep  = self.sequence_length().saturating_sub(1);
        let start = self.recent_context.len().saturating_sub(keep);
        let raw: Vec<[f32; FEATURE_DIM]> = self.recent_context[start..]
            .iter()
            .chain(std::iter::once(&live))
            .map(|f| f.to_array())
            .collect();
        self.predict_scaled(self.scaler.transform(&raw).as_slice())
    }

    fn run(&self, scaled: &[[f32; FEATURE_DIM]]) -> Result<Prediction, ForecastError> {
        let input  = single_window::<B>(scaled, &self.device);
        let output = self.model.forward(input);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ForecastError::InvalidWindow(format!("unreadable network output: {e:?}")))?;

        let prediction = Prediction::from_output(&values)?;
        tracing::debug!(
            "Predicted {:?} from a {}-row window",
            prediction,
            scaled.len()
        );
        Ok(prediction)
    }
}
