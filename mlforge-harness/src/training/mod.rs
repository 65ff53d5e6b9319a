//! Training orchestration: the epoch loop, checkpointing, early stopping,
//! and run-level metric aggregation.

pub mod checkpoint;
pub mod early_stopping;
pub mod metrics;
pub mod trainer;

pub use checkpoint::{CheckpointManager, CheckpointRecord, RestoredState};
pub use early_stopping::{Decision, EarlyStopSnapshot, EarlyStopper};
pub use metrics::{EpochAccumulator, RunHistory};
pub use trainer::Trainer;
