//! Coordinator-level error taxonomy.
//!
//! Agent-resolution failures never appear here: they are recovered inside the
//! coordinator. Pipeline failures surface as `CommandResult { success: false }`.
//! What remains are structural failures that propagate unmodified.

use cmdflow_state::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to create execution context: {0}")]
    ContextCreation(String),

    #[error("no execution strategy registered for provider {provider} and command kind {kind}")]
    StrategyNotFound { provider: String, kind: String },

    #[error("strategy execution failed: {0}")]
    StrategyExecution(String),

    #[error("session error: {0}")]
    Session(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for coordinator operations.
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_error_display() {
        let err = OrchestratorError::ContextCreation("provider name is empty".to_string());
        assert!(err.to_string().contains("execution context"));

        let err = OrchestratorError::StrategyNotFound {
            provider: "anthropic".to_string(),
            kind: "pipeline".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("pipeline"));
    }

    #[test]
    fn test_storage_error_converts() {
        let err: OrchestratorError = StorageError::SessionNotFound {
            session_id: "s-9".to_string(),
        }
        .into();
        assert!(err.to_string().contains("s-9"));
    }
}
