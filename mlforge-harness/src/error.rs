//! Error types for the mlforge-harness crate.

use mlforge_core::CoreError;
use thiserror::Error;

/// Top-level error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Checkpoint load error: {0}")]
    CheckpointLoad(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Hook contract violation: {0}")]
    HookContract(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Non-finite loss at epoch {epoch}, step {step}")]
    NonFiniteLoss { epoch: usize, step: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn checkpoint_load(msg: impl Into<String>) -> Self {
        Self::CheckpointLoad(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn hook_contract(msg: impl Into<String>) -> Self {
        Self::HookContract(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }
}
