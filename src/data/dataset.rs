use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::domain::observation::{FEATURE_DIM, OUTPUT_DIM};

/// One scaled window and the label of the row that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSample {
    /// `sequence_length` rows, oldest first.
    pub features: Vec<[f32; FEATURE_DIM]>,
    pub label:    [f32; OUTPUT_DIM],
}

pub struct WindowDataset {
    samples: Vec<WindowSample>,
}

impl WindowDataset {
    pub fn new(samples: Vec<WindowSample>) -> Self { Self { samples } }
}

impl Dataset<WindowSample> for WindowDataset {
    fn get(&self, index: usize) -> Option<WindowSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
