//! Error types for cmdflow-state

use thiserror::Error;

/// Errors that can occur in the session and cache storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Cache or context entry not found
    #[error("entry not found: {key}")]
    NotFound { key: String },

    /// Session has never been created in the backing store
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session id cannot be used as a file name
    #[error("invalid session id: {session_id:?}")]
    InvalidSessionId { session_id: String },

    /// Stored value could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backing file could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
