// ============================================================
// Layer 3 - Observation Domain Types
// ============================================================
// The raw record the whole system is trained on, plus the two
// fixed-width vectors derived from it:
//
//   Observation  ->  FeatureVector (8 scalars, network input)
//                ->  LabelVector   (4 type slots + severity)
//
// The field order of both vectors is a contract between the
// windower, the network and the inference adapter. Changing it
// invalidates every saved checkpoint.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::ForecastError;

/// Width of a feature row fed to the network.
pub const FEATURE_DIM: usize = 8;

/// Number of emergency categories the model distinguishes.
pub const NUM_EMERGENCY_TYPES: usize = 4;

/// Width of the label / output vector: one slot per type plus severity.
pub const OUTPUT_DIM: usize = NUM_EMERGENCY_TYPES + 1;

/// Column names in feature order, used when logging scaler statistics.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "day_of_year",
    "month",
    "year",
    "location_lat",
    "location_long",
    "weather_temp",
    "weather_humidity",
    "weather_wind_speed",
];

// ─── EmergencyType ────────────────────────────────────────────────────────────
/// The fixed set of emergency categories.
///
/// `ALL` defines the one-hot ordering. It is persisted with every
/// checkpoint and compared on load, so a reordering is caught instead of
/// silently mislabelling predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyType {
    Earthquake,
    Flood,
    Wildfire,
    Storm,
}

impl EmergencyType {
    pub const ALL: [EmergencyType; NUM_EMERGENCY_TYPES] = [
        EmergencyType::Earthquake,
        EmergencyType::Flood,
        EmergencyType::Wildfire,
        EmergencyType::Storm,
    ];

    /// Position of this type in the one-hot encoding.
    pub fn index(self) -> usize {
        match self {
            EmergencyType::Earthquake => 0,
            EmergencyType::Flood      => 1,
            EmergencyType::Wildfire   => 2,
            EmergencyType::Storm      => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EmergencyType::Earthquake => "earthquake",
            EmergencyType::Flood      => "flood",
            EmergencyType::Wildfire   => "wildfire",
            EmergencyType::Storm      => "storm",
        }
    }
}

impl fmt::Display for EmergencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EmergencyType {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.label() == wanted)
            .ok_or_else(|| {
                ForecastError::InvalidObservation(format!("unknown emergency type '{s}'"))
            })
    }
}

// ─── Observation ──────────────────────────────────────────────────────────────
/// One dated row of the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(alias = "date", deserialize_with = "deserialize_timestamp")]
    pub timestamp:          NaiveDateTime,
    #[serde(alias = "type")]
    pub emergency_type:     EmergencyType,
    pub severity:           f32,
    pub location_lat:       f32,
    pub location_long:      f32,
    pub weather_temp:       f32,
    pub weather_humidity:   f32,
    pub weather_wind_speed: f32,
}

impl Observation {
    /// Reject rows the windower cannot encode faithfully.
    pub fn validate(&self) -> Result<(), ForecastError> {
        if !(0.0..=1.0).contains(&self.severity) {
            return Err(ForecastError::InvalidObservation(format!(
                "severity {} at {} is outside [0, 1]",
                self.severity, self.timestamp
            )));
        }
        let numeric = [
            self.location_lat,
            self.location_long,
            self.weather_temp,
            self.weather_humidity,
            self.weather_wind_speed,
        ];
        if numeric.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidObservation(format!(
                "non-finite measurement at {}",
                self.timestamp
            )));
        }
        Ok(())
    }

    pub fn features(&self) -> FeatureVector {
        FeatureVector::from_context(
            self.timestamp.date(),
            self.location_lat,
            self.location_long,
            self.weather_temp,
            self.weather_humidity,
            self.weather_wind_speed,
        )
    }

    pub fn label(&self) -> LabelVector {
        LabelVector::one_hot(self.emergency_type, self.severity)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and bare `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp '{raw}'")))
}

// ─── FeatureVector ────────────────────────────────────────────────────────────
/// The 8 network inputs for one time step, unscaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub day_of_year:        f32,
    pub month:              f32,
    pub year:               f32,
    pub location_lat:       f32,
    pub location_long:      f32,
    pub weather_temp:       f32,
    pub weather_humidity:   f32,
    pub weather_wind_speed: f32,
}

impl FeatureVector {
    /// Derive the calendar fields from `date` and combine them with the
    /// location and weather readings.
    pub fn from_context(
        date:               NaiveDate,
        location_lat:       f32,
        location_long:      f32,
        weather_temp:       f32,
        weather_humidity:   f32,
        weather_wind_speed: f32,
    ) -> Self {
        Self {
            day_of_year: date.ordinal() as f32,
            month:       date.month() as f32,
            year:        date.year() as f32,
            location_lat,
            location_long,
            weather_temp,
            weather_humidity,
            weather_wind_speed,
        }
    }

    pub fn to_array(&self) -> [f32; FEATURE_DIM] {
        [
            self.day_of_year,
            self.month,
            self.year,
            self.location_lat,
            self.location_long,
            self.weather_temp,
            self.weather_humidity,
            self.weather_wind_speed,
        ]
    }
}

// ─── LabelVector ──────────────────────────────────────────────────────────────
/// Training target: one-hot type slots followed by severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelVector {
    pub type_probabilities: [f32; NUM_EMERGENCY_TYPES],
    pub severity:           f32,
}

impl LabelVector {
    pub fn one_hot(emergency_type: EmergencyType, severity: f32) -> Self {
        let mut type_probabilities = [0.0; NUM_EMERGENCY_TYPES];
        type_probabilities[emergency_type.index()] = 1.0;
        Self { type_probabilities, severity }
    }

    pub fn to_array(&self) -> [f32; OUTPUT_DIM] {
        let mut out = [0.0; OUTPUT_DIM];
        out[..NUM_EMERGENCY_TYPES].copy_from_slice(&self.type_probabilities);
        out[NUM_EMERGENCY_TYPES] = self.severity;
        out
    }
}
