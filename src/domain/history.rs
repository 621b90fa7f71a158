// ============================================================
// Layer 3 - Training History
// ============================================================
// What a training run reports back: one row per completed
// epoch, in order, and why the loop stopped.

use serde::{Deserialize, Serialize};

/// Losses recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    pub epoch:         usize,
    pub train_loss:    f64,
    pub val_loss:      f64,
    /// Learning rate in effect while this epoch trained.
    pub learning_rate: f64,
    /// Batches dropped because their loss was not finite.
    pub skipped_batches: usize,
}

/// Terminal state of the epoch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Validation loss stalled for `early_stopping_patience` epochs.
    EarlyStopped,
    /// `max_epochs` reached.
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs:        Vec<EpochLoss>,
    pub stop_reason:   StopReason,
    pub best_epoch:    Option<usize>,
    pub best_val_loss: f64,
}

impl TrainingHistory {
    pub fn last_epoch(&self) -> Option<usize> {
        self.epochs.last().map(|e| e.epoch)
    }
}
