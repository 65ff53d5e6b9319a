//! Error types for the mlforge-core crate.

use thiserror::Error;

/// Top-level error type for configuration and registry operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required config key: {0}")]
    MissingKey(String),

    #[error("No '{name}' registered in category '{category}'")]
    UnknownName { category: String, name: String },

    #[error("'{name}' is already registered in category '{category}'")]
    AlreadyRegistered { category: String, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey(key.into())
    }

    pub fn unknown_name(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownName {
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn already_registered(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            category: category.into(),
            name: name.into(),
        }
    }
}
