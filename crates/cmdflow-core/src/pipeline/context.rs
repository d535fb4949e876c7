//! Per-invocation execution context and cancellation plumbing.

use std::collections::BTreeMap;
use std::sync::Arc;

use cmdflow_state::{SessionId, SessionManager, StorageResult};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{CommandDefinition, OrchestratorError, OrchestratorResult, StageSpec};
use crate::pipeline::provider::ModelProvider;

/// Caller side of a cancellation channel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Stages already running finish; no new stage or
    /// retry attempt starts.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Engine side of a cancellation channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Create a linked cancel handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Inputs for [`ExecutionContext::new`].
pub struct ContextParams {
    pub command_name: String,
    pub command: CommandDefinition,
    pub agent_role: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, Value>,
    pub model: Option<String>,
    pub provider: Arc<dyn ModelProvider>,
    pub provider_name: String,
    pub session: Arc<dyn SessionManager>,
    pub cancel: CancelSignal,
    pub deadline: Option<Instant>,
}

/// Mutable bag owned by exactly one command execution.
pub struct ExecutionContext {
    command_name: String,
    command: CommandDefinition,
    agent_role: String,
    args: Vec<String>,
    flags: BTreeMap<String, Value>,
    model: Option<String>,
    provider: Arc<dyn ModelProvider>,
    provider_name: String,
    session: Arc<dyn SessionManager>,
    cancel: CancelSignal,
    deadline: Option<Instant>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("command", &self.command_name)
            .field("agent_role", &self.agent_role)
            .field("provider", &self.provider_name)
            .field("session_id", self.session.session_id())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Validate the bindings and build the context.
    ///
    /// Fails with [`OrchestratorError::ContextCreation`] for an invalid
    /// command definition, an empty provider name, or an empty agent role.
    pub fn new(params: ContextParams) -> OrchestratorResult<Self> {
        params
            .command
            .validate()
            .map_err(OrchestratorError::ContextCreation)?;
        if params.provider_name.trim().is_empty() {
            return Err(OrchestratorError::ContextCreation(
                "provider name is empty".to_string(),
            ));
        }
        if params.agent_role.trim().is_empty() {
            return Err(OrchestratorError::ContextCreation(format!(
                "no agent role resolved for command {}",
                params.command_name
            )));
        }

        Ok(Self {
            command_name: params.command_name,
            command: params.command,
            agent_role: params.agent_role,
            args: params.args,
            flags: params.flags,
            model: params.model,
            provider: params.provider,
            provider_name: params.provider_name,
            session: params.session,
            cancel: params.cancel,
            deadline: params.deadline,
        })
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn command(&self) -> &CommandDefinition {
        &self.command
    }

    pub fn agent_role(&self) -> &str {
        &self.agent_role
    }

    /// Role a stage runs as: its own override, else the command's agent.
    pub fn stage_role<'a>(&'a self, stage: &'a StageSpec) -> &'a str {
        stage.role.as_deref().unwrap_or(&self.agent_role)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn flags(&self) -> &BTreeMap<String, Value> {
        &self.flags
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn session(&self) -> &Arc<dyn SessionManager> {
        &self.session
    }

    pub fn session_id(&self) -> &SessionId {
        self.session.session_id()
    }

    /// True once the caller cancelled or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub async fn get_context(&self, key: &str) -> StorageResult<Option<Value>> {
        self.session.get_context(key).await
    }

    pub async fn set_context(&self, key: &str, value: Value) -> StorageResult<()> {
        self.session.set_context(key, value).await
    }

    pub async fn update_context(&self, key: &str, value: Value) -> StorageResult<()> {
        self.session.update_context(key, value).await
    }

    pub async fn get_all_context(&self) -> StorageResult<Map<String, Value>> {
        self.session.get_all_context().await
    }

    pub async fn get_stage_outputs(&self) -> StorageResult<BTreeMap<String, Value>> {
        self.session.get_stage_outputs().await
    }
}
