// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Persistence that several layers share but none owns:
//
//   checkpoint.rs  - Named checkpoint bundles on disk
//                    Model weights and optimizer state go
//                    through Burn's NamedMpkFileRecorder; the
//                    manifest (epoch, loss, scaler, scheduler
//                    and early-stopping state, recent context)
//                    is JSON. Bundles are staged and renamed
//                    into place so a crash never leaves a
//                    half-written checkpoint under a valid name.
//
//   metrics.rs     - Per-epoch training metrics as CSV
//                    for plotting learning curves.

/// Checkpoint bundles: save, load, archive, list
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;
