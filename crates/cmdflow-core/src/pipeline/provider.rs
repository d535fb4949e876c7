//! Model-provider seam invoked once per stage attempt.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::domain::StageSpec;
use crate::pipeline::error::StageError;

/// Everything a provider needs to run one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRequest {
    pub command: String,
    pub stage_id: String,
    pub template: String,
    /// Stage role override, else the command's resolved agent.
    pub agent_role: String,
    pub model: Option<String>,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, Value>,
    /// Outputs visible to this stage, keyed by stage id.
    pub inputs: BTreeMap<String, Value>,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Asynchronous model invocation.
///
/// Implementations classify their failures through [`StageError::kind`] so the
/// engine's retry policy can decide whether to try again.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name used for strategy lookup and logging.
    fn name(&self) -> &str;

    async fn invoke(&self, stage: &StageSpec, request: &StageRequest) -> Result<Value, StageError>;
}
