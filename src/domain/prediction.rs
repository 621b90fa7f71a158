// ============================================================
// Layer 3 - Prediction Types
// ============================================================
// Fixed-schema outputs. The network emits 5 independent sigmoid
// scores; `Prediction` names them so nothing downstream indexes
// the raw vector by position.

use serde::{Deserialize, Serialize};

use crate::domain::error::ForecastError;
use crate::domain::observation::{EmergencyType, NUM_EMERGENCY_TYPES, OUTPUT_DIM};

/// Model output for one window.
///
/// The type scores are independent probabilities and are not
/// normalised: they need not sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub type_probabilities: [f32; NUM_EMERGENCY_TYPES],
    pub severity:           f32,
}

impl Prediction {
    pub fn from_output(output: &[f32]) -> Result<Self, ForecastError> {
        if output.len() != OUTPUT_DIM {
            return Err(ForecastError::InvalidWindow(format!(
                "network produced {} values, expected {}",
                output.len(),
                OUTPUT_DIM
            )));
        }
        let mut type_probabilities = [0.0; NUM_EMERGENCY_TYPES];
        type_probabilities.copy_from_slice(&output[..NUM_EMERGENCY_TYPES]);
        Ok(Self { type_probabilities, severity: output[NUM_EMERGENCY_TYPES] })
    }

    /// Arg-max type and its raw score. Ties go to the earlier type.
    pub fn most_likely(&self) -> (EmergencyType, f32) {
        let mut best = 0usize;
        for (i, p) in self.type_probabilities.iter().enumerate() {
            if *p > self.type_probabilities[best] {
                best = i;
            }
        }
        (EmergencyType::ALL[best], self.type_probabilities[best])
    }
}

/// Live context for the prediction entry point. Calendar fields are
/// filled in from the current date by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub location_lat:       f32,
    pub location_long:      f32,
    pub weather_temp:       f32,
    pub weather_humidity:   f32,
    pub weather_wind_speed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predicted_emergency_type: EmergencyType,
    pub probability:              f32,
    pub severity:                 f32,
    pub reasoning:                String,
    pub recommendations:          Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_likely_picks_argmax() {
        let p = Prediction::from_output(&[0.1, 0.7, 0.6, 0.2, 0.4]).unwrap();
        assert_eq!(p.most_likely(), (EmergencyType::Flood, 0.7));
        assert_eq!(p.severity, 0.4);
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        assert!(Prediction::from_output(&[0.1, 0.2]).is_err());
    }
}
