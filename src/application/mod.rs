// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one goal each:
// train, predict, list checkpoints.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination and the forecaster service

/// Device / precision → concrete Burn backend
pub mod backend;

/// The neural `Forecaster` and its swappable model handle
pub mod forecaster;

/// Reasoning and recommendations for a prediction
pub mod advisor;

/// The training workflow and its configuration
pub mod train_use_case;

/// The live prediction workflow
pub mod predict_use_case;

/// Checkpoint listing
pub mod checkpoints_use_case;
