// ============================================================
// Layer 4 - Sequence Windower
// ============================================================
// Turns a time-ordered observation table into training windows.
//
// Fixed preprocessing order:
//   1. derive calendar fields (day_of_year, month, year)
//   2. select the 8-field feature vector
//   3. one-hot the emergency type into EmergencyType::ALL order
//   4. fit / apply the feature scaler
//   5. slide a window of length L; label = row i + L
//
// Example with N = 6 rows and L = 3:
//   start 0: rows [0, 1, 2] -> label row 3
//   start 1: rows [1, 2, 3] -> label row 4
//   start 2: rows [2, 3, 4] -> label row 5
//   (rows 3..6 never start a window: nothing follows them)
//
// So a table of N rows yields max(N - L, 0) windows, and N <= L
// yields none. Callers report that as insufficient history.

use crate::data::dataset::WindowSample;
use crate::data::scaler::FeatureScaler;
use crate::domain::error::ForecastError;
use crate::domain::observation::{FeatureVector, Observation, FEATURE_DIM, OUTPUT_DIM};

/// Output of fitting the windower on a training table.
#[derive(Debug, Clone)]
pub struct WindowedTable {
    pub samples: Vec<WindowSample>,
    pub scaler:  FeatureScaler,
    /// Unscaled feature rows at the tail of the table, at most L long.
    /// Persisted with the model so live predictions have history.
    pub recent_context: Vec<FeatureVector>,
}

#[derive(Debug, Clone, Copy)]
pub struct Windower {
    sequence_length: usize,
}

impl Windower {
    pub fn new(sequence_length: usize) -> Result<Self, ForecastError> {
        if sequence_length == 0 {
            return Err(ForecastError::InvalidConfig(
                "sequence_length must be at least 1".to_string(),
            ));
        }
        Ok(Self { sequence_length })
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Fit the scaler on `observations` and build every window.
    pub fn fit(&self, observations: &[Observation]) -> Result<WindowedTable, ForecastError> {
        check_time_order(observations)?;
        if observations.is_empty() {
            return Err(self.insufficient(0));
        }

        let features: Vec<FeatureVector> = observations.iter().map(|o| o.features()).collect();
        let raw: Vec<[f32; FEATURE_DIM]> = features.iter().map(|f| f.to_array()).collect();
        let scaler = FeatureScaler::fit(&raw)?;

        let scaled = scaler.transform(&raw);
        let labels = labels_of(observations);
        let samples = self.slide(&scaled, &labels);

        let tail_start = features.len().saturating_sub(self.sequence_length);
        let recent_context = features[tail_start..].to_vec();

        tracing::debug!(
            "Windowed {} observations into {} samples (L={})",
            observations.len(),
            samples.len(),
            self.sequence_length
        );

        Ok(WindowedTable { samples, scaler, recent_context })
    }

    /// The pairing rule: window [i, i+L) with label i+L, for i in [0, N-L).
    pub fn slide(
        &self,
        scaled: &[[f32; FEATURE_DIM]],
        labels: &[[f32; OUTPUT_DIM]],
    ) -> Vec<WindowSample> {
        let l = self.sequence_length;
        let n = scaled.len().min(labels.len());
        if n <= l {
            return Vec::new();
        }
        (0..n - l)
            .map(|i| WindowSample {
                features: scaled[i..i + l].to_vec(),
                label:    labels[i + l],
            })
            .collect()
    }

    /// The last L rows of `rows`: the window that predicts what comes next.
    pub fn most_recent<'a, T>(&self, rows: &'a [T]) -> Result<&'a [T], ForecastError> {
        if rows.len() < self.sequence_length {
            return Err(self.insufficient(rows.len()));
        }
        Ok(&rows[rows.len() - self.sequence_length..])
    }

    pub fn insufficient(&self, rows: usize) -> ForecastError {
        ForecastError::InsufficientHistory { rows, sequence_length: self.sequence_length }
    }
}

fn labels_of(observations: &[Observation]) -> Vec<[f32; OUTPUT_DIM]> {
    observations.iter().map(|o| o.label().to_array()).collect()
}

fn check_time_order(observations: &[Observation]) -> Result<(), ForecastError> {
    match observations.windows(2).position(|w| w[1].timestamp < w[0].timestamp) {
        Some(i) => Err(ForecastError::InvalidObservation(format!(
            "observations must be ordered by time: row {} ({}) precedes row {} ({})",
            i,
            observations[i].timestamp,
            i + 1,
            observations[i + 1].timestamp
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::observation::EmergencyType;
    use chrono::{Duration, NaiveDate};

    /// `n` daily observations with severity ramping from 0.1 to 0.9.
    pub(crate) fn synthetic_table(n: usize) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let t = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
                Observation {
                    timestamp:          start + Duration::days(i as i64),
                    emergency_type:     EmergencyType::ALL[i % 2 + 1],
                    severity:           0.1 + 0.8 * t,
                    location_lat:       37.77 + 0.01 * i as f32,
                    location_long:      -122.42,
                    weather_temp:       60.0 + 30.0 * t,
                    weather_humidity:   80.0 - 40.0 * t,
                    weather_wind_speed: 5.0 + (i % 7) as f32,
                }
            })
            .collect()
    }

    #[test]
    fn test_window_count_is_n_minus_l() {
        let windower = Windower::new(5).unwrap();
        for n in [1usize, 5, 6, 12, 40] {
            let table = windower.fit(&synthetic_table(n)).unwrap();
            assert_eq!(table.samples.len(), n.saturating_sub(5), "n = {n}");
        }
    }

    #[test]
    fn test_window_starts_at_matching_scaled_row() {
        let obs      = synthetic_table(12);
        let windower = Windower::new(4).unwrap();
        let table    = windower.fit(&obs).unwrap();
        let raw: Vec<_> = obs.iter().map(|o| o.features().to_array()).collect();
        let scaled   = table.scaler.transform(&raw);

        for (i, sample) in table.samples.iter().enumerate() {
            assert_eq!(sample.features.len(), 4);
            assert_eq!(sample.features[0], scaled[i]);
            assert_eq!(sample.label, obs[i + 4].label().to_array());
        }
    }

    #[test]
    fn test_n_equal_to_l_gives_no_windows() {
        let windower = Windower::new(30).unwrap();
        let table    = windower.fit(&synthetic_table(30)).unwrap();
        assert!(table.samples.is_empty());
        assert_eq!(table.recent_context.len(), 30);
    }

    #[test]
    fn test_most_recent_takes_the_tail() {
        let windower = Windower::new(3).unwrap();
        let rows     = [1, 2, 3, 4, 5];
        assert_eq!(windower.most_recent(&rows).unwrap(), &[3, 4, 5]);
        assert!(matches!(
            windower.most_recent(&rows[..2]),
            Err(ForecastError::InsufficientHistory { rows: 2, sequence_length: 3 })
        ));
    }

    #[test]
    fn test_unordered_table_is_rejected() {
        let mut obs = synthetic_table(6);
        obs.swap(1, 4);
        let windower = Windower::new(2).unwrap();
        assert!(matches!(windower.fit(&obs), Err(ForecastError::InvalidObservation(_))));
    }

    #[test]
    fn test_zero_length_window_is_invalid() {
        assert!(Windower::new(0).is_err());
    }
}
