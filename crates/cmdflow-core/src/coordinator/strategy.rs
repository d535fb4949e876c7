//! Execution strategies and their registry.
//!
//! The coordinator looks up one strategy per invocation by
//! `(provider name, command kind)`; a provider of `"*"` matches any provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::domain::{CommandKind, CommandResult, OrchestratorError, OrchestratorResult};
use crate::pipeline::{ExecutionContext, PipelineEngine, PipelineOutcome};

/// Provider key that matches every provider.
pub const ANY_PROVIDER: &str = "*";

/// Runs a fully-built execution context to a `CommandResult`.
///
/// Stage failures belong in `CommandResult { success: false, .. }`; an `Err`
/// means the strategy itself could not run and propagates unmodified.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> OrchestratorResult<CommandResult>;
}

/// Delegates to the pipeline engine. Used for commands with a declared
/// `prompts.pipeline`.
pub struct PipelineStrategy {
    engine: Arc<PipelineEngine>,
}

impl PipelineStrategy {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ExecutionStrategy for PipelineStrategy {
    async fn execute(&self, ctx: &ExecutionContext) -> OrchestratorResult<CommandResult> {
        let started = Instant::now();
        let outcome = self.engine.run(ctx).await;
        Ok(command_result(ctx, outcome, started))
    }
}

/// Runs a command without a declared pipeline as its single implicit stage,
/// named after the command. Caching, retry and cancellation are the engine's.
pub struct DirectStrategy {
    engine: Arc<PipelineEngine>,
}

impl DirectStrategy {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    async fn execute(&self, ctx: &ExecutionContext) -> OrchestratorResult<CommandResult> {
        if ctx.command().kind() != CommandKind::Direct {
            return Err(OrchestratorError::StrategyExecution(format!(
                "command {} declares a pipeline; the direct strategy runs only commands without one",
                ctx.command_name()
            )));
        }
        let started = Instant::now();
        let outcome = self.engine.run(ctx).await;
        Ok(command_result(ctx, outcome, started))
    }
}

fn command_result(ctx: &ExecutionContext, outcome: PipelineOutcome, started: Instant) -> CommandResult {
    CommandResult {
        agent: ctx.agent_role().to_string(),
        args: ctx.args().to_vec(),
        flags: ctx.flags().clone(),
        model: ctx.model().map(str::to_string),
        command: ctx.command_name().to_string(),
        session_id: ctx.session_id().to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
        outputs: outcome.outputs,
        success: outcome.success,
        error: outcome.error.map(|e| e.to_string()),
        cached: outcome.cached,
        stages: outcome.stages,
    }
}

/// Handlers keyed by `(provider name, command kind)`.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<(String, CommandKind), Arc<dyn ExecutionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline and direct strategies for every provider, sharing `engine`.
    pub fn with_defaults(engine: Arc<PipelineEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(
            ANY_PROVIDER,
            CommandKind::Pipeline,
            Arc::new(PipelineStrategy::new(engine.clone())),
        );
        registry.register(
            ANY_PROVIDER,
            CommandKind::Direct,
            Arc::new(DirectStrategy::new(engine)),
        );
        registry
    }

    /// Register (or replace) the handler for `(provider, kind)`.
    pub fn register(
        &mut self,
        provider: impl Into<String>,
        kind: CommandKind,
        strategy: Arc<dyn ExecutionStrategy>,
    ) {
        self.strategies.insert((provider.into(), kind), strategy);
    }

    /// Exact provider match first, then the `"*"` wildcard.
    pub fn strategy_for(
        &self,
        provider: &str,
        kind: CommandKind,
    ) -> OrchestratorResult<Arc<dyn ExecutionStrategy>> {
        self.strategies
            .get(&(provider.to_string(), kind))
            .or_else(|| self.strategies.get(&(ANY_PROVIDER.to_string(), kind)))
            .cloned()
            .ok_or_else(|| OrchestratorError::StrategyNotFound {
                provider: provider.to_string(),
                kind: kind.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
