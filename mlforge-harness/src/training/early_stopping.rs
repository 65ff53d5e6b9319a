//! Early stopping — pure decision function over the monitored score stream.

use mlforge_core::ScoreMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of one epoch's score, consumed by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub stop_early: bool,
    pub save_checkpoint: bool,
}

/// Persistable stopper state, embedded in every checkpoint so a resumed
/// run continues from the true best score instead of guessing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopSnapshot {
    pub mode: ScoreMode,
    pub best_score: Option<f64>,
    pub counter: usize,
}

/// Tracks the monitored score across epochs and decides continue/stop/save.
///
/// Mutated once per epoch by the trainer. Once `stop_early` has been
/// returned the caller must not call `decide` again.
#[derive(Debug)]
pub struct EarlyStopper {
    mode: ScoreMode,
    patience: usize,
    best_score: Option<f64>,
    counter: usize,
}

impl EarlyStopper {
    pub fn new(mode: ScoreMode, patience: usize) -> Self {
        Self {
            mode,
            patience,
            best_score: None,
            counter: 0,
        }
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Strict improvement per the mode's comparator resets the patience
    /// counter and requests a checkpoint; anything else burns patience.
    /// The first score always improves.
    pub fn decide(&mut self, score: f64) -> Decision {
        let improved = match self.best_score {
            None => true,
            Some(best) => match self.mode {
                ScoreMode::Max => score > best,
                ScoreMode::Min => score < best,
            },
        };
        if improved {
            self.best_score = Some(score);
            self.counter = 0;
            Decision {
                stop_early: false,
                save_checkpoint: true,
            }
        } else {
            self.counter += 1;
            Decision {
                stop_early: self.counter >= self.patience,
                save_checkpoint: false,
            }
        }
    }

    pub fn snapshot(&self) -> EarlyStopSnapshot {
        EarlyStopSnapshot {
            mode: self.mode,
            best_score: self.best_score,
            counter: self.counter,
        }
    }

    /// Restore state from a checkpoint. A snapshot taken under the other
    /// mode is ignored; its best score is meaningless here.
    pub fn restore(&mut self, snapshot: &EarlyStopSnapshot) {
        if snapshot.mode != self.mode {
            warn!(?snapshot.mode, "Ignoring early-stopping snapshot with mismatched mode");
            return;
        }
        self.best_score = snapshot.best_score;
        self.counter = snapshot.counter;
    }
}
