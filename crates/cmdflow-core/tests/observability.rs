//! Observability tests for command execution tracing.
//!
//! These tests verify that the lifecycle emitters and the coordinator produce
//! the structured events operators rely on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cmdflow_core::{
    emit_agent_fallback, emit_cache_hit, emit_command_finished, emit_stage_finished,
    emit_stage_retry, emit_stage_started, CapabilityRegistry, CapabilitySource, CommandDefinition,
    CommandSpan, DynamicAgentResolver, ErrorKind, ExecutionCoordinator, ExecutionOptions,
    ModelProvider, PipelineEngine, ResolvedCommand, ResolverConfig, RetryPolicy, StageError,
    StageRequest, StageSpec, StageStatus, StrategyRegistry,
};
use cmdflow_state::fakes::MemorySessionManager;
use serde_json::{json, Value};
use tracing_test::traced_test;

struct OkProvider;

#[async_trait]
impl ModelProvider for OkProvider {
    fn name(&self) -> &str {
        "ok"
    }

    async fn invoke(&self, stage: &StageSpec, _request: &StageRequest) -> Result<Value, StageError> {
        Ok(json!({ "stage": stage.id }))
    }
}

/// Fails the first call with a network error, then succeeds.
#[derive(Default)]
struct FlakyProvider {
    calls: AtomicU32,
}

#[async_trait]
impl ModelProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, stage: &StageSpec, _request: &StageRequest) -> Result<Value, StageError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StageError::network("connection reset"));
        }
        Ok(json!({ "stage": stage.id }))
    }
}

fn resolver() -> Arc<DynamicAgentResolver> {
    let source = json!({
        "capabilities": {
            "platform-engineer": {"domains": ["infrastructure"], "expertise": ["terraform"], "priority": 1}
        }
    });
    let registry =
        CapabilityRegistry::load(CapabilitySource::Bytes(serde_json::to_vec(&source).unwrap()))
            .unwrap();
    Arc::new(DynamicAgentResolver::new(Arc::new(registry), ResolverConfig::default()))
}

/// Test: dynamic selection logs the chosen role with confidence and reasons
#[tokio::test]
#[traced_test]
async fn test_dynamic_selection_is_logged() {
    let mut cmd = CommandDefinition::new("implement", "software-engineer");
    cmd.dynamic_agent_selection = true;

    let coordinator =
        ExecutionCoordinator::new(StrategyRegistry::with_defaults(Arc::new(PipelineEngine::default())))
            .with_resolver(resolver());
    coordinator
        .execute_command(
            "implement",
            ResolvedCommand::new(cmd, Arc::new(OkProvider)),
            ExecutionOptions::default().with_args(["Setup Terraform infrastructure"]),
            Arc::new(MemorySessionManager::new("obs-1")),
        )
        .await
        .unwrap();

    assert!(logs_contain("Dynamic agent selected: platform-engineer"));
    assert!(logs_contain("confidence"));
    assert!(logs_contain("command.finished"));
}

/// Test: an inconclusive selection logs a fallback warning
#[tokio::test]
#[traced_test]
async fn test_inconclusive_selection_logs_fallback() {
    let mut cmd = CommandDefinition::new("implement", "software-engineer");
    cmd.dynamic_agent_selection = true;

    let coordinator =
        ExecutionCoordinator::new(StrategyRegistry::with_defaults(Arc::new(PipelineEngine::default())))
            .with_resolver(resolver());
    let out = coordinator
        .execute_command(
            "implement",
            ResolvedCommand::new(cmd, Arc::new(OkProvider)),
            ExecutionOptions::default().with_args(["make it nicer"]),
            Arc::new(MemorySessionManager::new("obs-2")),
        )
        .await
        .unwrap();

    assert_eq!(out.result.agent, "software-engineer");
    assert!(logs_contain("agent.fallback"));
    assert!(!logs_contain("Dynamic agent selected"));
}

/// Test: stage lifecycle emitters produce their event names
#[traced_test]
#[test]
fn test_stage_emitters_log_event_names() {
    emit_stage_started("implement", "plan", "software-engineer");
    emit_stage_retry("plan", 1, ErrorKind::Timeout, 500);
    emit_stage_finished("plan", StageStatus::Succeeded, 2, 1200);

    assert!(logs_contain("stage.started"));
    assert!(logs_contain("stage.retry"));
    assert!(logs_contain("stage.finished"));
}

/// Test: cache and command emitters
#[traced_test]
#[test]
fn test_cache_and_command_emitters() {
    emit_cache_hit("stage", "stage:implement:plan:abc");
    emit_command_finished("implement", "platform-engineer", 42, true);
    emit_agent_fallback("implement", "software-engineer", &"registry missing");

    assert!(logs_contain("cache.hit"));
    assert!(logs_contain("stage:implement:plan:abc"));
    assert!(logs_contain("registry missing"));
}

/// Test: CommandSpan::enter creates an entered span without panicking
#[traced_test]
#[test]
fn test_command_span_enter_creates_span() {
    let span = CommandSpan::enter("implement", "session-1");
    emit_stage_started("implement", "plan", "software-engineer");
    drop(span);

    assert!(logs_contain("cmdflow.command"));
}

/// Test: a retried stage logs its Running and Retrying transitions
#[tokio::test]
#[traced_test]
async fn test_retried_stage_logs_status_transitions() {
    let mut cmd = CommandDefinition::new("implement", "software-engineer");
    cmd.prompts.pipeline = vec![StageSpec::new("plan", "implement/plan")];
    cmd.prompts.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        backoff_ms: 0,
        retry_on: [ErrorKind::Network].into_iter().collect(),
    });

    let coordinator =
        ExecutionCoordinator::new(StrategyRegistry::with_defaults(Arc::new(PipelineEngine::default())));
    let out = coordinator
        .execute_command(
            "implement",
            ResolvedCommand::new(cmd, Arc::new(FlakyProvider::default())),
            ExecutionOptions::default().with_args(["plan it"]),
            Arc::new(MemorySessionManager::new("obs-3")),
        )
        .await
        .unwrap();

    assert!(out.result.success);
    assert_eq!(out.result.stages[0].status, StageStatus::Succeeded);
    assert_eq!(out.result.stages[0].attempts, 2);
    assert!(logs_contain("stage.status"));
    assert!(logs_contain("Running"));
    assert!(logs_contain("Retrying"));
}
