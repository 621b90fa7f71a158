use burn::{
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        BiLstm, BiLstmConfig,
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

use crate::domain::error::ForecastError;
use crate::domain::observation::{FEATURE_DIM, OUTPUT_DIM};

/// Number of residual refinement blocks after attention.
const RESIDUAL_BLOCKS: usize = 2;

#[derive(Config, Debug)]
pub struct EmergencyPredictorConfig {
    pub d_input:    usize,
    pub d_hidden:   usize,
    pub num_layers: usize,
    pub d_output:   usize,
    #[config(default = 4)]
    pub num_heads:  usize,
    #[config(default = 0.2)]
    pub dropout:    f64,
}

impl EmergencyPredictorConfig {
    /// Network sized for the fixed 8-feature / 5-output contract.
    pub fn for_features(d_hidden: usize, num_layers: usize) -> Self {
        Self::new(FEATURE_DIM, d_hidden, num_layers, OUTPUT_DIM)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let invalid = |msg: String| Err(ForecastError::InvalidConfig(msg));
        if self.d_input != FEATURE_DIM {
            return invalid(format!("d_input must be {FEATURE_DIM}, got {}", self.d_input));
        }
        if self.d_output != OUTPUT_DIM {
            return invalid(format!("d_output must be {OUTPUT_DIM}, got {}", self.d_output));
        }
        if self.num_layers == 0 {
            return invalid("num_layers must be at least 1".to_string());
        }
        if self.d_hidden == 0 || self.num_heads == 0 || (2 * self.d_hidden) % self.num_heads != 0 {
            return invalid(format!(
                "attention width {} must be divisible by {} heads",
                2 * self.d_hidden,
                self.num_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> EmergencyPredictor<B> {
        let width = self.d_hidden * 2;

        // Layer 0 reads raw features, deeper layers read both directions.
        let encoder: Vec<BiLstm<B>> = (0..self.num_layers)
            .map(|layer| {
                let d_in = if layer == 0 { self.d_input } else { width };
                BiLstmConfig::new(d_in, self.d_hidden, true).init(device)
            })
            .collect();

        let attention = MultiHeadAttentionConfig::new(width, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);

        let residual_blocks = (0..RESIDUAL_BLOCKS)
            .map(|_| ResidualBlock {
                linear:  LinearConfig::new(width, width).init(device),
                norm:    LayerNormConfig::new(width).init(device),
                dropout: DropoutConfig::new(self.dropout).init(),
            })
            .collect();

        EmergencyPredictor {
            encoder,
            attention,
            residual_blocks,
            head_hidden: LinearConfig::new(width, self.d_hidden).init(device),
            head_output: LinearConfig::new(self.d_hidden, self.d_output).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// `x + dropout(relu(norm(linear(x))))`
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub linear:  Linear<B>,
    pub norm:    LayerNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let fx = self.dropout.forward(relu(self.norm.forward(self.linear.forward(x.clone()))));
        x + fx
    }
}

#[derive(Module, Debug)]
pub struct EmergencyPredictor<B: Backend> {
    pub encoder:         Vec<BiLstm<B>>,
    pub attention:       MultiHeadAttention<B>,
    pub residual_blocks: Vec<ResidualBlock<B>>,
    pub head_hidden:     Linear<B>,
    pub head_output:     Linear<B>,
    pub dropout:         Dropout,
}

impl<B: Backend> EmergencyPredictor<B> {
    /// features: [batch, seq_len, 8] → scores: [batch, 5], each in [0, 1]
    pub fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(features))
    }

    /// Pre-sigmoid scores; the loss is computed from these.
    pub fn forward_logits(&self, features: Tensor<B, 3>) -> Tensor<B, 2> {
        let last_layer = self.encoder.len().saturating_sub(1);

        let mut x = features;
        for (i, layer) in self.encoder.iter().enumerate() {
            let (out, _state) = layer.forward(x, None);
            // Dropout between stacked layers only, as in a stacked RNN.
            x = if i < last_layer { self.dropout.forward(out) } else { out };
        }

        let attended = self.attention.forward(MhaInput::self_attn(x)).context;

        // Only the final time step feeds the decision.
        let [batch_size, seq_len, width] = attended.dims();
        let mut h = attended
            .slice([0..batch_size, seq_len - 1..seq_len, 0..width])
            .reshape([batch_size, width]);

        for block in &self.residual_blocks {
            h = block.forward(h);
        }

        let h = self.dropout.forward(relu(self.head_hidden.forward(h)));
        self.head_output.forward(h)
    }

    /// Returns (mean BCE, sigmoid outputs).
    pub fn forward_loss(&self, features: Tensor<B, 3>, targets: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward_logits(features);
        let loss   = binary_cross_entropy_with_logits(logits.clone(), targets);
        (loss, sigmoid(logits))
    }
}

/// Mean elementwise binary cross-entropy over batch and outputs,
/// taken on logits `z` with targets `y`:
///
///   max(z, 0) - z*y + ln(1 + e^-|z|)
///
/// This equals `-(y ln σ(z) + (1-y) ln(1-σ(z)))` but never takes the
/// log of a saturated probability, so it stays finite in f16 too.
/// Outputs are independent sigmoids, so each entry is its own
/// Bernoulli target (severity included) rather than one softmax class.
pub fn binary_cross_entropy_with_logits<B: Backend, const D: usize>(
    logits:  Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let softplus = logits.clone().abs().neg().exp().log1p();
    (relu(logits.clone()) - logits * targets + softplus).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn small_config() -> EmergencyPredictorConfig {
        EmergencyPredictorConfig::for_features(8, 2).with_dropout(0.1)
    }

    #[test]
    fn test_output_shape_matches_output_dim() {
        let device = Default::default();
        let model  = small_config().init::<TestBackend>(&device);
        let input  = Tensor::<TestBackend, 3>::random([3, 12, FEATURE_DIM], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [3, OUTPUT_DIM]);
    }

    #[test]
    fn test_outputs_stay_in_unit_interval_for_extreme_inputs() {
        let device = Default::default();
        let model  = small_config().init::<TestBackend>(&device);

        // temperature = 1e6 on every step, plus huge negatives elsewhere
        let mut rows = vec![[0.0f32; FEATURE_DIM]; 10];
        for (t, row) in rows.iter_mut().enumerate() {
            row[5] = 1e6;
            row[3] = -1e5 * t as f32;
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let input  = Tensor::<TestBackend, 3>::from_data(TensorData::new(flat, [1, 10, FEATURE_DIM]), &device);
        let values = model.forward(input).into_data().to_vec::<f32>().unwrap();

        assert_eq!(values.len(), OUTPUT_DIM);
        assert!(values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)), "{values:?}");
    }

    /// Logit whose sigmoid is `p`.
    fn logit(p: f32) -> f32 {
        (p / (1.0 - p)).ln()
    }

    #[test]
    fn test_bce_matches_hand_computation() {
        let device  = Default::default();
        let logits  = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![logit(0.8), logit(0.4)], [1, 2]), &device);
        let targets = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 2]), &device);
        let loss    = binary_cross_entropy_with_logits(logits, targets).into_scalar();
        let expected = -((0.8f32).ln() + (0.6f32).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn test_bce_is_finite_at_saturated_predictions() {
        let device  = Default::default();
        // sigmoid(±60) rounds to exactly 0 / 1 in f32, let alone f16
        let logits  = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![-60.0f32, 60.0, 60.0], [1, 3]), &device);
        let targets = Tensor::<TestBackend, 2>::from_data(TensorData::new(vec![1.0f32, 0.0, 1.0], [1, 3]), &device);
        let loss    = binary_cross_entropy_with_logits(logits, targets).into_scalar();
        // two confidently wrong entries cost ~60 each, the right one ~0
        assert!((loss - 40.0).abs() < 1e-3, "{loss}");
    }

    #[test]
    fn test_forward_loss_outputs_are_sigmoid_of_logits() {
        let device  = Default::default();
        let model   = small_config().with_dropout(0.0).init::<TestBackend>(&device);
        let input   = Tensor::<TestBackend, 3>::random([2, 6, FEATURE_DIM], Distribution::Default, &device);
        let targets = Tensor::<TestBackend, 2>::zeros([2, OUTPUT_DIM], &device);
        let (_, outputs) = model.forward_loss(input.clone(), targets);
        outputs.into_data().assert_approx_eq(&model.forward(input).into_data(), 5);
    }

    #[test]
    fn test_config_validation() {
        assert!(small_config().validate().is_ok());
        assert!(EmergencyPredictorConfig::for_features(8, 0).validate().is_err());
        assert!(EmergencyPredictorConfig::for_features(8, 1).with_num_heads(3).validate().is_err());
        assert!(EmergencyPredictorConfig::new(7, 8, 1, OUTPUT_DIM).validate().is_err());
        assert!(small_config().with_dropout(1.0).validate().is_err());
    }
}
