// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from the raw observation table to tensor batches.
//
//   observations.csv
//       │
//       ▼
//   CsvObservationLoader → parses, validates, time-sorts rows
//       │
//       ▼
//   Windower             → features, one-hot labels, scaling,
//       │                  sliding windows of length L
//       ▼
//   split_train_val      → seeded 80/20 split
//       │
//       ▼
//   WindowDataset        → implements Burn's Dataset trait
//       │
//       ▼
//   WindowBatcher        → stacks windows into [N, L, 8] tensors
//       │
//       ▼
//   DataLoader           → feeds batches to the training loop

/// Reads observation tables from CSV
pub mod loader;

/// Per-feature standardisation fitted on training data
pub mod scaler;

/// Sliding windows over the feature table
pub mod windower;

/// Implements Burn's Dataset trait for windows
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Shuffles and splits windows into train/validation sets
pub mod splitter;
