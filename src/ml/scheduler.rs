// ============================================================
// Layer 5 - Reduce-on-Plateau Learning Rate Scheduler
// ============================================================
// Lowers the learning rate when validation loss stops improving.
//
//   improved   ⇔ loss < best * (1 - threshold)     (relative mode)
//   bad epochs > patience  →  lr = max(lr * factor, min_lr)
//
// The bad-epoch counter is independent of early stopping and is
// reset after every reduction. The whole state is serialisable
// so an interrupted run resumes with the same schedule.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauState {
    pub learning_rate: f64,
    pub best:          f64,
    pub bad_epochs:    usize,
    pub reductions:    usize,
}

#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    factor:    f64,
    patience:  usize,
    threshold: f64,
    min_lr:    f64,
    state:     PlateauState,
}

impl PlateauScheduler {
    pub const DEFAULT_THRESHOLD: f64 = 1e-4;

    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            threshold: Self::DEFAULT_THRESHOLD,
            min_lr,
            state: PlateauState {
                learning_rate: initial_lr,
                best:          f64::INFINITY,
                bad_epochs:    0,
                reductions:    0,
            },
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.state.learning_rate
    }

    /// Record one epoch's validation loss and return the learning rate
    /// for the next epoch.
    pub fn step(&mut self, val_loss: f64) -> f64 {
        let s = &mut self.state;
        if val_loss < s.best * (1.0 - self.threshold) {
            s.best       = val_loss;
            s.bad_epochs = 0;
        } else {
            s.bad_epochs += 1;
        }

        if s.bad_epochs > self.patience {
            let reduced = (s.learning_rate * self.factor).max(self.min_lr);
            if s.learning_rate - reduced > f64::EPSILON {
                tracing::info!(
                    "Validation loss plateaued for {} epochs: learning rate {:.3e} -> {:.3e}",
                    s.bad_epochs,
                    s.learning_rate,
                    reduced
                );
                s.learning_rate = reduced;
                s.reductions   += 1;
            }
            s.bad_epochs = 0;
        }
        s.learning_rate
    }

    pub fn state(&self) -> &PlateauState {
        &self.state
    }

    pub fn restore(&mut self, state: PlateauState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_after_patience_plus_one_bad_epochs() {
        let mut s = PlateauScheduler::new(1e-3, 0.5, 2, 0.0);
        assert_eq!(s.step(1.0), 1e-3); // improvement
        assert_eq!(s.step(1.0), 1e-3); // bad 1
        assert_eq!(s.step(1.0), 1e-3); // bad 2
        assert_eq!(s.step(1.0), 5e-4); // bad 3 > patience
        assert_eq!(s.state().reductions, 1);
        assert_eq!(s.state().bad_epochs, 0);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut s = PlateauScheduler::new(1e-3, 0.5, 1, 0.0);
        s.step(1.0);
        s.step(1.0);
        s.step(0.5);
        assert_eq!(s.step(0.5), 1e-3);
        assert_eq!(s.step(0.5), 5e-4);
    }

    #[test]
    fn test_tiny_improvement_below_threshold_counts_as_bad() {
        let mut s = PlateauScheduler::new(1e-3, 0.5, 0, 0.0);
        s.step(1.0);
        // 1e-6 relative gain is under the 1e-4 threshold
        assert_eq!(s.step(0.999_999), 5e-4);
    }

    #[test]
    fn test_respects_min_lr() {
        let mut s = PlateauScheduler::new(1e-3, 0.1, 0, 5e-4);
        s.step(1.0);
        assert_eq!(s.step(2.0), 5e-4);
        assert_eq!(s.step(2.0), 5e-4);
        assert_eq!(s.state().reductions, 1);
    }

    #[test]
    fn test_state_restore() {
        let mut a = PlateauScheduler::new(1e-3, 0.5, 0, 0.0);
        a.step(1.0);
        a.step(2.0);
        let mut b = PlateauScheduler::new(1e-3, 0.5, 0, 0.0);
        b.restore(a.state().clone());
        assert_eq!(b.learning_rate(), a.learning_rate());
        assert_eq!(b.step(3.0), a.step(3.0));
    }
}
