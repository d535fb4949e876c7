//! Error types for pipeline execution.

use serde::{Deserialize, Serialize};

use crate::domain::ErrorKind;

/// A classified failure of a single stage attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOutput, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

/// Terminal pipeline failure, surfaced as `CommandResult.error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("stage {stage} failed after {attempts} attempt(s): {source}")]
    StageFailed {
        stage: String,
        attempts: u32,
        #[source]
        source: StageError,
    },

    #[error("cancelled before stage {stage}")]
    Cancelled { stage: String },
}
