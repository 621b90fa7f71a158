// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// Everything that touches tensors, autodiff or optimizers.
//
//   model.rs          - BiLSTM encoder + self-attention +
//                       residual blocks + sigmoid head, and the
//                       binary cross-entropy loss
//
//   precision.rs      - Full / mixed precision and the dynamic
//                       loss scaler
//
//   scheduler.rs      - Reduce-on-plateau learning rate
//
//   early_stopping.rs - Epoch state machine on validation loss
//
//   trainer.rs        - The training loop: batches, validation,
//                       scheduling, checkpoints, metrics
//
//   inferencer.rs     - Forward-only prediction on the
//                       non-autodiff backend
//
// Backends are chosen once, at construction, from the device
// field of the training config. CPU runs on NdArray, the optional
// GPU backend on wgpu. Weights and optimizer moments are f32 on
// both; mixed precision only switches on dynamic loss scaling.

use burn::backend::{Autodiff, NdArray};

/// Network architecture and loss
pub mod model;

/// Precision mode and gradient scaling
pub mod precision;

/// Learning-rate reduction on validation plateaus
pub mod scheduler;

/// Early stopping monitor
pub mod early_stopping;

/// Full training loop with validation and checkpointing
pub mod trainer;

/// Inference engine over a trained or restored network
pub mod inferencer;

pub type CpuBackend      = NdArray<f32>;
pub type CpuTrainBackend = Autodiff<CpuBackend>;

#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu<f32>;
#[cfg(feature = "wgpu")]
pub type GpuTrainBackend = Autodiff<GpuBackend>;

/// Where tensors live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu"                  => Ok(DeviceKind::Cpu),
            "gpu" | "wgpu" | "cuda" => Ok(DeviceKind::Gpu),
            other => Err(format!("unknown device '{other}' (expected cpu or gpu)")),
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Gpu => write!(f, "gpu"),
        }
    }
}
