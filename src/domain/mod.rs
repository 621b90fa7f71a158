// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define the core
// concepts of the system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only plain data, validation and traits

/// Observation rows and the feature / label vectors derived from them
pub mod observation;

/// Fixed-schema prediction outputs and request/response shapes
pub mod prediction;

/// Per-epoch loss history returned by training
pub mod history;

/// Failure conditions with stable tags
pub mod error;

/// Core abstractions (traits) that other layers implement
pub mod traits;
