//! Error types for revow-storage

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed record at {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("External collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage tier error: {0}")]
    Tier(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn malformed(key: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::MalformedRecord {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error came from an external collaborator rather than local state.
    pub fn is_external(&self) -> bool {
        matches!(self, StorageError::ExternalUnavailable(_))
    }
}
