// ============================================================
// Layer 5 - Mixed Precision Loss Scaling
// ============================================================
// Half-precision gradients underflow to zero for small losses.
// The dynamic loss scaler keeps them representable:
//
//   1. loss_scaled = loss * S           (before backward)
//   2. g = grad(loss_scaled) / S        (before the optimizer step)
//   3. any non-finite g  -> skip the step, S = S * 0.5
//      growth_interval clean steps in a row -> S = S * 2
//
// Step 2 restores the true gradient, so the optimizer sees the
// same update it would in full precision; only the transport
// through the backward pass is scaled.
//
// In full precision the scale is pinned to 1, but a step whose
// gradients are not finite is still skipped.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};

/// Numeric mode of a training run, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Full,
    Mixed,
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "fp32"  => Ok(Precision::Full),
            "mixed" | "amp"  => Ok(Precision::Mixed),
            other => Err(format!("unknown precision '{other}' (expected full or mixed)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradScalerState {
    pub scale:         f32,
    pub growth_streak: usize,
}

#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled:         bool,
    scale:           f32,
    growth_factor:   f32,
    backoff_factor:  f32,
    growth_interval: usize,
    growth_streak:   usize,
}

impl GradScaler {
    pub const INITIAL_SCALE: f32 = 65536.0;
    pub const GROWTH_INTERVAL: usize = 2000;

    pub fn new(precision: Precision) -> Self {
        let enabled = precision == Precision::Mixed;
        Self {
            enabled,
            scale:           if enabled { Self::INITIAL_SCALE } else { 1.0 },
            growth_factor:   2.0,
            backoff_factor:  0.5,
            growth_interval: Self::GROWTH_INTERVAL,
            growth_streak:   0,
        }
    }

    #[cfg(test)]
    pub fn with_growth_interval(mut self, interval: usize) -> Self {
        self.growth_interval = interval.max(1);
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Multiply the loss by the current scale before `backward()`.
    pub fn scale_loss<B: Backend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        if self.enabled { loss.mul_scalar(self.scale) } else { loss }
    }

    /// Divide every gradient of `module` by the scale in place.
    ///
    /// Returns `false` when any unscaled gradient is NaN or infinite,
    /// in which case the caller must skip the optimizer step. The
    /// check runs in both modes.
    pub fn unscale<B, M>(&self, module: &M, grads: &mut GradientsParams) -> bool
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = GradientUnscaler::<B> {
            grads,
            inv_scale: if self.enabled { Some(1.0 / self.scale) } else { None },
            found_inf: false,
            _backend:  core::marker::PhantomData,
        };
        module.visit(&mut visitor);
        !visitor.found_inf
    }

    /// Advance the dynamic scale after a step attempt.
    pub fn update(&mut self, found_inf: bool) {
        if !self.enabled {
            return;
        }
        if found_inf {
            self.scale = (self.scale * self.backoff_factor).max(f32::MIN_POSITIVE);
            self.growth_streak = 0;
            tracing::debug!("Gradient overflow: loss scale reduced to {}", self.scale);
            return;
        }
        self.growth_streak += 1;
        if self.growth_streak >= self.growth_interval {
            let grown = self.scale * self.growth_factor;
            if grown.is_finite() {
                self.scale = grown;
            }
            self.growth_streak = 0;
        }
    }

    pub fn state(&self) -> GradScalerState {
        GradScalerState { scale: self.scale, growth_streak: self.growth_streak }
    }

    pub fn restore(&mut self, state: &GradScalerState) {
        if self.enabled {
            self.scale         = state.scale;
            self.growth_streak = state.growth_streak;
        }
    }
}

/// Walks every float parameter, rescales its gradient and flags
/// non-finite values.
struct GradientUnscaler<'a, B: AutodiffBackend> {
    grads:     &'a mut GradientsParams,
    inv_scale: Option<f32>,
    found_inf: bool,
    _backend:  core::marker::PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientUnscaler<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let grad = match self.inv_scale {
            Some(inv) => grad.mul_scalar(inv),
            None => grad,
        };

        // |g| summed is finite iff every entry is finite.
        let magnitude: f32 = grad.clone().abs().sum().into_scalar().elem();
        if !magnitude.is_finite() {
            self.found_inf = true;
        }
        self.grads.register::<B::InnerBackend, D>(id, grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::EmergencyPredictorConfig;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_full_precision_is_a_no_op() {
        let mut scaler = GradScaler::new(Precision::Full);
        assert_eq!(scaler.scale(), 1.0);
        scaler.update(true);
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn test_overflow_halves_the_scale() {
        let mut scaler = GradScaler::new(Precision::Mixed);
        scaler.update(true);
        assert_eq!(scaler.scale(), GradScaler::INITIAL_SCALE / 2.0);
    }

    #[test]
    fn test_clean_streak_doubles_the_scale() {
        let mut scaler = GradScaler::new(Precision::Mixed).with_growth_interval(3);
        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale(), GradScaler::INITIAL_SCALE);
        scaler.update(false);
        assert_eq!(scaler.scale(), GradScaler::INITIAL_SCALE * 2.0);
        // an overflow resets the streak
        scaler.update(true);
        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale(), GradScaler::INITIAL_SCALE);
    }

    #[test]
    fn test_unscaled_gradients_match_full_precision() {
        let device = Default::default();
        let model  = EmergencyPredictorConfig::for_features(4, 1)
            .with_dropout(0.0)
            .init::<TestBackend>(&device);
        let input   = Tensor::<TestBackend, 3>::random([2, 5, 8], Distribution::Default, &device);
        let targets = Tensor::<TestBackend, 2>::random([2, 5], Distribution::Default, &device);

        let (loss, _)   = model.forward_loss(input.clone(), targets.clone());
        let plain       = GradientsParams::from_grads(loss.backward(), &model);

        let scaler      = GradScaler::new(Precision::Mixed);
        let (loss, _)   = model.forward_loss(input, targets);
        let mut scaled  = GradientsParams::from_grads(scaler.scale_loss(loss).backward(), &model);
        assert!(scaler.unscale(&model, &mut scaled));

        let id = model.head_output.weight.id;
        let a  = plain.get::<NdArray<f32>, 2>(id).unwrap().into_data().to_vec::<f32>().unwrap();
        let b  = scaled.get::<NdArray<f32>, 2>(id).unwrap().into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= 1e-4 * x.abs().max(1e-3), "{x} vs {y}");
        }
    }

    #[test]
    fn test_non_finite_gradient_is_caught_in_full_precision() {
        let device = Default::default();
        let model  = EmergencyPredictorConfig::for_features(4, 1)
            .with_dropout(0.0)
            .init::<TestBackend>(&device);

        let id    = model.head_output.weight.id;
        let dims  = model.head_output.weight.dims();
        let mut grads = GradientsParams::new();
        grads.register::<NdArray<f32>, 2>(id, Tensor::full(dims, f32::NAN, &device));

        let scaler = GradScaler::new(Precision::Full);
        assert!(!scaler.unscale(&model, &mut grads));
        // nothing to back off from, the scale stays pinned
        assert_eq!(scaler.scale(), 1.0);
    }

    #[test]
    fn test_state_round_trip() {
        let mut scaler = GradScaler::new(Precision::Mixed);
        scaler.update(true);
        let state      = scaler.state();
        let mut fresh  = GradScaler::new(Precision::Mixed);
        fresh.restore(&state);
        assert_eq!(fresh.scale(), scaler.scale());
    }
}
