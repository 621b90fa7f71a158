// ============================================================
// Layer 4 - Feature Scaler
// ============================================================
// Per-feature standardisation: z = (x - mean) / std.
//
// Statistics are fitted once, on the training table, and then
// travel with the model inside every checkpoint. Inference
// windows are transformed with those stored statistics; the
// scaler is never refit outside `fit`.
//
// Variance is the population variance (ddof = 0). A column with
// zero variance (e.g. a single-year dataset's `year`) keeps a
// scale of 1 so it maps to 0 instead of dividing by zero.

use serde::{Deserialize, Serialize};

use crate::domain::error::ForecastError;
use crate::domain::observation::{FEATURE_DIM, FEATURE_NAMES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean:     [f64; FEATURE_DIM],
    pub variance: [f64; FEATURE_DIM],
    /// Number of rows the statistics were fitted on.
    pub samples:  usize,
}

impl FeatureScaler {
    /// Fit mean and variance over `rows`.
    pub fn fit(rows: &[[f32; FEATURE_DIM]]) -> Result<Self, ForecastError> {
        if rows.is_empty() {
            return Err(ForecastError::InsufficientHistory { rows: 0, sequence_length: 0 });
        }
        let n = rows.len() as f64;

        let mut mean = [0.0f64; FEATURE_DIM];
        for row in rows {
            for (m, &x) in mean.iter_mut().zip(row.iter()) {
                *m += x as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        // Second pass rather than E[x²] - E[x]² to keep `year`-sized
        // magnitudes from cancelling catastrophically.
        let mut variance = [0.0f64; FEATURE_DIM];
        for row in rows {
            for ((v, &x), m) in variance.iter_mut().zip(row.iter()).zip(mean.iter()) {
                let d = x as f64 - m;
                *v += d * d;
            }
        }
        variance.iter_mut().for_each(|v| *v /= n);

        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            tracing::debug!("Scaler {:>18}: mean={:.4} std={:.4}", name, mean[i], variance[i].sqrt());
        }
        Ok(Self { mean, variance, samples: rows.len() })
    }

    fn scale(&self, i: usize) -> f64 {
        let std = self.variance[i].sqrt();
        if std > f64::EPSILON { std } else { 1.0 }
    }

    pub fn transform_row(&self, row: &[f32; FEATURE_DIM]) -> [f32; FEATURE_DIM] {
        let mut out = [0.0f32; FEATURE_DIM];
        for (i, (o, &x)) in out.iter_mut().zip(row.iter()).enumerate() {
            *o = ((x as f64 - self.mean[i]) / self.scale(i)) as f32;
        }
        out
    }

    pub fn transform(&self, rows: &[[f32; FEATURE_DIM]]) -> Vec<[f32; FEATURE_DIM]> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<[f32; FEATURE_DIM]> {
        (0..10)
            .map(|i| {
                let x = i as f32;
                [x, 2.0 * x, 2024.0, 37.7, -122.4, 60.0 + x, 50.0, x * x]
            })
            .collect()
    }

    #[test]
    fn test_transformed_columns_are_standardised() {
        let data   = rows();
        let scaler = FeatureScaler::fit(&data).unwrap();
        let out    = scaler.transform(&data);

        let mean0: f32 = out.iter().map(|r| r[0]).sum::<f32>() / out.len() as f32;
        let var0:  f32 = out.iter().map(|r| r[0] * r[0]).sum::<f32>() / out.len() as f32;
        assert!(mean0.abs() < 1e-5);
        assert!((var0 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_constant_column_maps_to_zero() {
        let data   = rows();
        let scaler = FeatureScaler::fit(&data).unwrap();
        let out    = scaler.transform(&data);
        // year column is constant
        assert!(out.iter().all(|r| r[2] == 0.0));
    }

    #[test]
    fn test_fit_then_transform_is_deterministic() {
        let data = rows();
        let a    = FeatureScaler::fit(&data).unwrap();
        let b    = FeatureScaler::fit(&data).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.transform(&data), a.transform(&data));
        assert_eq!(a.transform(&data), b.transform(&data));
    }

    #[test]
    fn test_transform_never_changes_statistics() {
        let data     = rows();
        let scaler   = FeatureScaler::fit(&data).unwrap();
        let snapshot = scaler.clone();
        let unseen   = vec![[1e6f32; FEATURE_DIM]; 3];
        let _        = scaler.transform(&unseen);
        assert_eq!(scaler, snapshot);
    }

    #[test]
    fn test_empty_fit_is_rejected() {
        assert!(FeatureScaler::fit(&[]).is_err());
    }
}
