//! Error types for agent selection.

/// Errors produced by the agent-selection layer.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// The capability source is missing or malformed, or `initialize()` was
    /// never called.
    #[error("capability registry load failed: {reason}")]
    RegistryLoad { reason: String },

    /// Selection could not be carried out (e.g. the session was unreadable).
    #[error("agent resolution failed: {reason}")]
    Resolution { reason: String },
}

impl SelectionError {
    pub(crate) fn registry_load(reason: impl Into<String>) -> Self {
        SelectionError::RegistryLoad {
            reason: reason.into(),
        }
    }
}

/// Result type for agent-selection operations.
pub type SelectionResult<T> = std::result::Result<T, SelectionError>;
