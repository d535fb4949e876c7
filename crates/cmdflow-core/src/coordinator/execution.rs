//! Execution coordinator.
//!
//! One call of [`ExecutionCoordinator::execute_command`] walks
//! `ResolveAgent -> BuildContext -> SelectExecutionStrategy -> RunPipeline ->
//! PersistSelection -> ReturnResult`. The agent selection is written to the
//! session as soon as resolution finishes, so a failed run still records which
//! agent was chosen and why.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cmdflow_state::SessionManager;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::{
    AgentSelection, CommandDefinition, CommandResult, OrchestratorResult,
    SELECTION_CONTEXT_KEY,
};
use crate::obs;
use crate::pipeline::{CancelSignal, ContextParams, ExecutionContext, ModelProvider};
use crate::selection::{DynamicAgentResolver, SelectionResult};

use super::strategy::StrategyRegistry;

/// A command definition bound to the provider that will run it.
#[derive(Clone)]
pub struct ResolvedCommand {
    pub command: CommandDefinition,
    pub provider: Arc<dyn ModelProvider>,
    pub provider_name: String,
}

impl ResolvedCommand {
    /// Bind `command` to `provider`, naming the binding after the provider.
    pub fn new(command: CommandDefinition, provider: Arc<dyn ModelProvider>) -> Self {
        let provider_name = provider.name().to_string();
        Self {
            command,
            provider,
            provider_name,
        }
    }
}

/// Per-invocation inputs.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Positional arguments. The first one is the task description used for
    /// dynamic agent selection.
    pub args: Vec<String>,
    pub flags: BTreeMap<String, Value>,
    pub model: Option<String>,
    pub cancel: CancelSignal,
    /// Wall-clock budget for the whole command.
    pub timeout: Option<Duration>,
    /// Append the result to the session's command history.
    pub record_history: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            flags: BTreeMap::new(),
            model: None,
            cancel: CancelSignal::never(),
            timeout: None,
            record_history: true,
        }
    }
}

impl ExecutionOptions {
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: Value) -> Self {
        self.flags.insert(key.into(), value);
        self
    }

    /// Task description handed to the resolver: the first positional
    /// argument, or empty.
    pub fn task_description(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// Returned by [`ExecutionCoordinator::execute_command`].
pub struct ExecutionResult {
    pub result: CommandResult,
    pub session: Arc<dyn SessionManager>,
    pub started_at: DateTime<Utc>,
}

impl std::fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("result", &self.result)
            .field("session_id", self.session.session_id())
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Top-level command state machine.
pub struct ExecutionCoordinator {
    resolver: Option<Arc<DynamicAgentResolver>>,
    strategies: StrategyRegistry,
}

impl ExecutionCoordinator {
    /// A coordinator without a resolver: every command runs its static agent.
    pub fn new(strategies: StrategyRegistry) -> Self {
        Self {
            resolver: None,
            strategies,
        }
    }

    /// Builder: enable dynamic agent selection.
    pub fn with_resolver(mut self, resolver: Arc<DynamicAgentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Execute one command invocation.
    ///
    /// Agent-resolution failures are recovered by falling back to the
    /// command's `fallback_agent` (else `agent`). Context-creation,
    /// strategy-lookup and strategy-execution errors propagate unmodified.
    /// A pipeline failure is not an error: it comes back as
    /// `result.success == false`.
    #[instrument(skip_all, fields(command = %command_name, session_id = %session.session_id()))]
    pub async fn execute_command(
        &self,
        command_name: &str,
        resolved: ResolvedCommand,
        options: ExecutionOptions,
        session: Arc<dyn SessionManager>,
    ) -> OrchestratorResult<ExecutionResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = options
            .timeout
            .map(|t| tokio::time::Instant::now() + t);

        let command = resolved.command;
        let (agent_role, selection) = self
            .resolve_agent(command_name, &command, &options, session.as_ref())
            .await;

        if let Some(selection) = &selection {
            persist_selection(session.as_ref(), selection).await;
        }

        let kind = command.kind();
        let ctx = ExecutionContext::new(ContextParams {
            command_name: command_name.to_string(),
            command,
            agent_role,
            args: options.args,
            flags: options.flags,
            model: options.model,
            provider: resolved.provider,
            provider_name: resolved.provider_name,
            session: session.clone(),
            cancel: options.cancel,
            deadline,
        })?;

        let strategy = self.strategies.strategy_for(ctx.provider_name(), kind)?;

        let mut result = strategy.execute(&ctx).await?;
        result.duration_ms = started.elapsed().as_millis() as u64;

        if options.record_history {
            if let Err(e) = session.record_command(result.to_record()).await {
                obs::emit_session_write_error(session.session_id().as_str(), "commands", &e);
            }
        }

        obs::emit_command_finished(command_name, &result.agent, result.duration_ms, result.success);

        Ok(ExecutionResult {
            result,
            session,
            started_at,
        })
    }

    /// Decide the agent role, plus the selection to persist when dynamic
    /// resolution was attempted.
    async fn resolve_agent(
        &self,
        command_name: &str,
        command: &CommandDefinition,
        options: &ExecutionOptions,
        session: &dyn SessionManager,
    ) -> (String, Option<AgentSelection>) {
        let resolver = match (&self.resolver, command.dynamic_agent_selection) {
            (Some(resolver), true) => resolver,
            _ => {
                debug!(agent = %command.agent, "static agent");
                return (command.agent.clone(), None);
            }
        };

        let fallback = command.fallback_role();
        match try_resolve(resolver, command, options.task_description(), session).await {
            Ok(selection) => match selection.selected_agent.clone() {
                Some(role) => {
                    obs::emit_agent_selected(command_name, &role, &selection);
                    (role, Some(selection))
                }
                None => {
                    obs::emit_agent_fallback(command_name, fallback, &"no capability matched");
                    (
                        fallback.to_string(),
                        Some(selection.resolved_by_fallback(fallback)),
                    )
                }
            },
            Err(e) => {
                obs::emit_agent_fallback(command_name, fallback, &e);
                (
                    fallback.to_string(),
                    Some(AgentSelection::fallback(fallback, e.to_string())),
                )
            }
        }
    }
}

async fn try_resolve(
    resolver: &DynamicAgentResolver,
    command: &CommandDefinition,
    description: &str,
    session: &dyn SessionManager,
) -> SelectionResult<AgentSelection> {
    let allowed = resolver.allowed_candidates(command.agent_selection_criteria.as_deref())?;
    resolver
        .resolve_for_session(description, session, allowed.as_ref())
        .await
}

async fn persist_selection(session: &dyn SessionManager, selection: &AgentSelection) {
    let value = match serde_json::to_value(selection) {
        Ok(value) => value,
        Err(e) => {
            obs::emit_session_write_error(session.session_id().as_str(), SELECTION_CONTEXT_KEY, &e);
            return;
        }
    };
    if let Err(e) = session.set_context(SELECTION_CONTEXT_KEY, value).await {
        obs::emit_session_write_error(session.session_id().as_str(), SELECTION_CONTEXT_KEY, &e);
    }
}
