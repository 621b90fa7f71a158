// ============================================================
// Layer 5 - Early Stopping
// ============================================================
// Epoch state machine driven by validation loss:
//
//   Training(e) → Validating(e) → Continuing
//                               → EarlyStopped  (stall == patience)
//                               → Exhausted     (e == max_epochs)
//
// Only a strictly lower loss counts as an improvement; an equal
// loss is a stall.

use serde::{Deserialize, Serialize};

use crate::domain::history::StopReason;

/// Outcome of validating one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpochVerdict {
    /// New best: persist the "best" checkpoint.
    Improved,
    /// No improvement but patience not yet spent.
    Stalled { stall: usize },
    /// Loop must end after this epoch.
    Stop(StopReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingState {
    pub best_loss:  f64,
    pub best_epoch: Option<usize>,
    pub stall:      usize,
}

impl Default for EarlyStoppingState {
    fn default() -> Self {
        Self { best_loss: f64::INFINITY, best_epoch: None, stall: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience:   usize,
    max_epochs: usize,
    state:      EarlyStoppingState,
}

impl EarlyStopping {
    pub fn new(patience: usize, max_epochs: usize) -> Self {
        Self { patience, max_epochs, state: EarlyStoppingState::default() }
    }

    /// Feed the validation loss of `epoch` (1-based).
    ///
    /// An improving final epoch reports `Improved`; the caller checks
    /// `is_last_epoch` to tell that apart from a run that continues.
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> EpochVerdict {
        if val_loss < self.state.best_loss {
            self.state.best_loss  = val_loss;
            self.state.best_epoch = Some(epoch);
            self.state.stall      = 0;
            return EpochVerdict::Improved;
        }

        self.state.stall += 1;
        if self.state.stall >= self.patience {
            tracing::info!(
                "Early stopping at epoch {}: no improvement for {} epochs (best {:.4} at epoch {:?})",
                epoch,
                self.state.stall,
                self.state.best_loss,
                self.state.best_epoch
            );
            return EpochVerdict::Stop(StopReason::EarlyStopped);
        }
        if self.is_last_epoch(epoch) {
            return EpochVerdict::Stop(StopReason::Exhausted);
        }
        EpochVerdict::Stalled { stall: self.state.stall }
    }

    pub fn is_last_epoch(&self, epoch: usize) -> bool {
        epoch >= self.max_epochs
    }

    pub fn state(&self) -> &EarlyStoppingState {
        &self.state
    }

    pub fn restore(&mut self, state: EarlyStoppingState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `losses` through the monitor; return (last epoch run, best epoch, reason).
    fn drive(losses: &[f64], patience: usize, max_epochs: usize) -> (usize, Option<usize>, StopReason) {
        let mut es = EarlyStopping::new(patience, max_epochs);
        for (i, &loss) in losses.iter().enumerate().take(max_epochs) {
            let epoch = i + 1;
            match es.observe(epoch, loss) {
                EpochVerdict::Stop(reason) => return (epoch, es.state().best_epoch, reason),
                EpochVerdict::Improved if es.is_last_epoch(epoch) => {
                    return (epoch, es.state().best_epoch, StopReason::Exhausted)
                }
                _ => {}
            }
        }
        panic!("loss sequence ended before the monitor stopped");
    }

    #[test]
    fn test_stops_at_k_plus_patience() {
        // improves through epoch 4, then flat
        let losses = [1.0, 0.8, 0.6, 0.5, 0.5, 0.55, 0.7, 0.5, 0.9, 0.9];
        let (stopped_at, best, reason) = drive(&losses, 3, 50);
        assert_eq!(reason, StopReason::EarlyStopped);
        assert_eq!(best, Some(4));
        assert_eq!(stopped_at, 4 + 3);
    }

    #[test]
    fn test_equal_loss_is_not_an_improvement() {
        let mut es = EarlyStopping::new(5, 50);
        assert_eq!(es.observe(1, 0.5), EpochVerdict::Improved);
        assert_eq!(es.observe(2, 0.5), EpochVerdict::Stalled { stall: 1 });
        assert_eq!(es.state().best_epoch, Some(1));
    }

    #[test]
    fn test_exhausted_when_max_epochs_reached_first() {
        let losses = [1.0, 0.9, 0.95, 0.8, 0.85];
        let (stopped_at, best, reason) = drive(&losses, 10, 5);
        assert_eq!(reason, StopReason::Exhausted);
        assert_eq!(stopped_at, 5);
        assert_eq!(best, Some(4));
    }

    #[test]
    fn test_improvement_resets_stall() {
        let mut es = EarlyStopping::new(2, 50);
        es.observe(1, 1.0);
        es.observe(2, 1.1);
        es.observe(3, 0.9);
        assert_eq!(es.observe(4, 1.0), EpochVerdict::Stalled { stall: 1 });
        assert_eq!(es.observe(5, 1.0), EpochVerdict::Stop(StopReason::EarlyStopped));
    }
}
