// ============================================================
// Layer 4 - Window Batcher
// ============================================================
// Implements Burn's Batcher trait to stack WindowSamples into
// the tensors the network consumes.
//
//   Input:  Vec of N samples, each L rows of 8 features
//   Output: features [N, L, 8], targets [N, 5]
//
// Rows are flattened sample-major, then reshaped:
//   [s1_t1_f1 .. s1_t1_f8, s1_t2_f1, ..., sN_tL_f8] -> [N, L, 8]

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::WindowSample;
use crate::domain::observation::{FEATURE_DIM, OUTPUT_DIM};

/// A batch of windows ready for the forward pass.
#[derive(Debug, Clone)]
pub struct WindowBatch<B: Backend> {
    /// Shape: [batch_size, sequence_length, FEATURE_DIM]
    pub features: Tensor<B, 3>,
    /// Shape: [batch_size, OUTPUT_DIM]
    pub targets:  Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct WindowBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<WindowSample, WindowBatch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<WindowSample>) -> WindowBatch<B> {
        let batch_size = items.len();
        // Every window of a run has the same length
        let seq_len    = items.first().map(|s| s.features.len()).unwrap_or(0);

        let feature_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.features.iter().flat_map(|row| row.iter().copied()))
            .collect();

        let target_flat: Vec<f32> = items
            .iter()
            .flat_map(|s| s.label.iter().copied())
            .collect();

        let features = Tensor::<B, 3>::from_data(
            TensorData::new(feature_flat, [batch_size, seq_len, FEATURE_DIM]),
            &self.device,
        );
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(target_flat, [batch_size, OUTPUT_DIM]),
            &self.device,
        );

        WindowBatch { features, targets }
    }
}

/// Stack a single window `[L][8]` into a `[1, L, 8]` tensor.
pub fn single_window<B: Backend>(rows: &[[f32; FEATURE_DIM]], device: &B::Device) -> Tensor<B, 3> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::<B, 3>::from_data(TensorData::new(flat, [1, rows.len(), FEATURE_DIM]), device)
}
