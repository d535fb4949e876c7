//! Built-in `echo` provider.
//!
//! Returns the rendered stage request as the stage output. Useful for
//! dry-running a command definition and inspecting what each stage would
//! have been sent.

use async_trait::async_trait;
use cmdflow_core::{ModelProvider, StageError, StageRequest, StageSpec};
use serde_json::Value;

pub const ECHO_PROVIDER: &str = "echo";

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        ECHO_PROVIDER
    }

    async fn invoke(&self, _stage: &StageSpec, request: &StageRequest) -> Result<Value, StageError> {
        serde_json::to_value(request).map_err(|e| StageError::invalid_output(e.to_string()))
    }
}
