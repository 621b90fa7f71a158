// ============================================================
// Layer 2 - Advisor
// ============================================================
// Turns a raw prediction plus the live request into the response
// a caller sees: arg-max type, its score, severity, a one-line
// reasoning and a short recommendation list.

use crate::domain::observation::EmergencyType;
use crate::domain::prediction::{Prediction, PredictionRequest, PredictionResponse};

const HOT_TEMP: f32        = 90.0;
const HUMID: f32           = 80.0;
const WINDY: f32           = 30.0;
const HIGH_SEVERITY: f32   = 0.7;
const MEDIUM_SEVERITY: f32 = 0.4;

pub fn respond(request: &PredictionRequest, prediction: &Prediction) -> PredictionResponse {
    let (predicted_emergency_type, probability) = prediction.most_likely();
    PredictionResponse {
        predicted_emergency_type,
        probability,
        severity:        prediction.severity,
        reasoning:       reasoning(request, prediction.severity),
        recommendations: recommendations(predicted_emergency_type, prediction.severity),
    }
}

pub fn reasoning(request: &PredictionRequest, severity: f32) -> String {
    let mut reasons = Vec::new();
    if request.weather_temp > HOT_TEMP {
        reasons.push("High temperatures increase risk of heat-related emergencies");
    }
    if request.weather_humidity > HUMID {
        reasons.push("High humidity could lead to severe weather conditions");
    }
    if request.weather_wind_speed > WINDY {
        reasons.push("Strong winds may escalate certain emergency situations");
    }
    if severity > HIGH_SEVERITY {
        reasons.push("Multiple risk factors indicate high severity potential");
    } else if severity > MEDIUM_SEVERITY {
        reasons.push("Moderate risk factors detected");
    }

    if reasons.is_empty() {
        "No immediate risk factors detected".to_string()
    } else {
        reasons.join(" and ")
    }
}

pub fn recommendations(emergency_type: EmergencyType, severity: f32) -> Vec<String> {
    let base: [&str; 3] = match emergency_type {
        EmergencyType::Earthquake => [
            "Secure heavy furniture and objects",
            "Know safe spots in each room",
            "Keep emergency supplies ready",
        ],
        EmergencyType::Flood => [
            "Move valuables to higher ground",
            "Prepare emergency water supplies",
            "Monitor local weather updates",
        ],
        EmergencyType::Wildfire => [
            "Clear vegetation around property",
            "Prepare evacuation plan",
            "Keep important documents accessible",
        ],
        EmergencyType::Storm => [
            "Secure outdoor objects",
            "Check emergency kit supplies",
            "Stay informed about weather updates",
        ],
    };

    let mut out = Vec::with_capacity(base.len() + 1);
    if severity > HIGH_SEVERITY {
        out.push("Consider immediate precautionary measures".to_string());
    }
    out.extend(base.iter().map(|s| s.to_string()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: f32, humidity: f32, wind: f32) -> PredictionRequest {
        PredictionRequest {
            location_lat:       34.05,
            location_long:      -118.24,
            weather_temp:       temp,
            weather_humidity:   humidity,
            weather_wind_speed: wind,
        }
    }

    #[test]
    fn test_calm_conditions() {
        assert_eq!(reasoning(&request(70.0, 50.0, 5.0), 0.2), "No immediate risk factors detected");
    }

    #[test]
    fn test_clauses_are_joined_in_order() {
        let text = reasoning(&request(95.0, 85.0, 35.0), 0.8);
        assert_eq!(
            text,
            "High temperatures increase risk of heat-related emergencies and \
             High humidity could lead to severe weather conditions and \
             Strong winds may escalate certain emergency situations and \
             Multiple risk factors indicate high severity potential"
        );
    }

    #[test]
    fn test_moderate_severity_clause() {
        assert_eq!(reasoning(&request(70.0, 50.0, 5.0), 0.5), "Moderate risk factors detected");
        // thresholds are strict
        assert_eq!(reasoning(&request(90.0, 80.0, 30.0), 0.4), "No immediate risk factors detected");
    }

    #[test]
    fn test_high_severity_prefixes_recommendations() {
        let recs = recommendations(EmergencyType::Wildfire, 0.9);
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0], "Consider immediate precautionary measures");
        assert_eq!(recs[1], "Clear vegetation around property");
        assert_eq!(recommendations(EmergencyType::Storm, 0.3).len(), 3);
    }

    #[test]
    fn test_response_uses_argmax_type() {
        let prediction = Prediction::from_output(&[0.1, 0.2, 0.3, 0.6, 0.75]).unwrap();
        let response   = respond(&request(70.0, 90.0, 5.0), &prediction);
        assert_eq!(response.predicted_emergency_type, EmergencyType::Storm);
        assert_eq!(response.probability, 0.6);
        assert_eq!(response.severity, 0.75);
        assert_eq!(response.recommendations[1], "Secure outdoor objects");
        assert!(response.reasoning.starts_with("High humidity"));
    }
}
