//! Pipeline engine tests: ordering, parallel merge, retry, caching,
//! cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cmdflow_core::domain::{
    CacheStrategy, CommandDefinition, ErrorKind, MergeStrategy, RetryPolicy, StageSpec,
    StageStatus,
};
use cmdflow_core::pipeline::{
    cancel_pair, CacheLayer, CancelSignal, ContextParams, EngineConfig, ExecutionContext,
    ModelProvider, PipelineEngine, PipelineError, StageError, StageRequest,
};
use cmdflow_state::fakes::{MemoryCacheStore, MemorySessionManager};
use serde_json::{json, Value};

#[derive(Clone)]
enum Behavior {
    Succeed,
    Fail(ErrorKind),
    /// Fail the first `n` attempts with `kind`, then succeed.
    FailFirst(u32, ErrorKind),
}

#[derive(Debug, Clone)]
struct Call {
    stage: String,
    attempt: u32,
    started: u64,
    finished: u64,
    inputs: Vec<String>,
}

/// Provider whose per-stage behavior is scripted and whose calls are logged.
struct ScriptedProvider {
    behaviors: HashMap<String, Behavior>,
    delay: Duration,
    clock: AtomicU64,
    calls: Mutex<Vec<Call>>,
    on_call: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            delay: Duration::from_millis(10),
            clock: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            on_call: None,
        }
    }

    fn with(mut self, stage: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(stage.to_string(), behavior);
        self
    }

    fn on_call(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, stage: &str) -> usize {
        self.calls().iter().filter(|c| c.stage == stage).count()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, stage: &StageSpec, request: &StageRequest) -> Result<Value, StageError> {
        let started = self.tick();
        tokio::time::sleep(self.delay).await;
        let finished = self.tick();
        self.calls.lock().unwrap().push(Call {
            stage: stage.id.clone(),
            attempt: request.attempt,
            started,
            finished,
            inputs: request.inputs.keys().cloned().collect(),
        });
        if let Some(hook) = &self.on_call {
            hook(&stage.id);
        }

        match self.behaviors.get(&stage.id).cloned().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => Ok(json!({ "stage": stage.id, "role": request.agent_role })),
            Behavior::Fail(kind) => Err(StageError::new(kind, format!("{} failed", stage.id))),
            Behavior::FailFirst(n, kind) if request.attempt <= n => {
                Err(StageError::new(kind, format!("{} flaky", stage.id)))
            }
            Behavior::FailFirst(..) => Ok(json!({ "stage": stage.id, "recovered": true })),
        }
    }
}

fn command(stages: Vec<StageSpec>, merge: MergeStrategy) -> CommandDefinition {
    let mut cmd = CommandDefinition::new("implement", "software-engineer");
    cmd.prompts.pipeline = stages;
    cmd.prompts.merge_strategy = merge;
    cmd.prompts.retry_policy = Some(RetryPolicy {
        max_attempts: 1,
        backoff_ms: 0,
        retry_on: Default::default(),
    });
    cmd
}

fn context(cmd: CommandDefinition, provider: Arc<ScriptedProvider>, cancel: CancelSignal) -> ExecutionContext {
    ExecutionContext::new(ContextParams {
        command_name: cmd.name.clone(),
        command: cmd,
        agent_role: "software-engineer".to_string(),
        args: vec!["add a login endpoint".to_string()],
        flags: Default::default(),
        model: None,
        provider,
        provider_name: "scripted".to_string(),
        session: Arc::new(MemorySessionManager::new("session-1")),
        cancel,
        deadline: None,
    })
    .unwrap()
}

fn stages(ids: &[&str]) -> Vec<StageSpec> {
    ids.iter()
        .map(|id| StageSpec::new(*id, format!("implement/{id}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_sequential_stages_never_overlap() {
    let provider = Arc::new(ScriptedProvider::new());
    let ctx = context(
        command(stages(&["plan", "code", "test"]), MergeStrategy::Sequential),
        provider.clone(),
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;
    assert!(outcome.success);

    let calls = provider.calls();
    let order: Vec<&str> = calls.iter().map(|c| c.stage.as_str()).collect();
    assert_eq!(order, vec!["plan", "code", "test"]);
    for pair in calls.windows(2) {
        assert!(
            pair[1].started > pair[0].finished,
            "{} started before {} finished",
            pair[1].stage,
            pair[0].stage
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_sequential_stage_sees_prior_outputs() {
    let provider = Arc::new(ScriptedProvider::new());
    let ctx = context(
        command(stages(&["plan", "code", "test"]), MergeStrategy::Sequential),
        provider.clone(),
        CancelSignal::never(),
    );

    PipelineEngine::default().run(&ctx).await;

    let calls = provider.calls();
    assert!(calls[0].inputs.is_empty());
    assert_eq!(calls[1].inputs, vec!["plan"]);
    assert_eq!(calls[2].inputs, vec!["code", "plan"]);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_failure_halts_pipeline() {
    let provider = Arc::new(ScriptedProvider::new().with("code", Behavior::Fail(ErrorKind::Error)));
    let ctx = context(
        command(stages(&["plan", "code", "test"]), MergeStrategy::Sequential),
        provider.clone(),
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;

    assert!(!outcome.success);
    assert_eq!(provider.calls_for("test"), 0);
    assert_eq!(outcome.stages[1].status, StageStatus::FailedStage);
    assert_eq!(outcome.stages[2].status, StageStatus::Pending);
    assert!(outcome.outputs.contains_key("plan"));
    assert!(!outcome.outputs.contains_key("code"));
    assert!(matches!(
        outcome.error,
        Some(PipelineError::StageFailed { ref stage, .. }) if stage == "code"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failed_branch_contributes_no_keys() {
    let provider = Arc::new(ScriptedProvider::new().with("a", Behavior::Fail(ErrorKind::Error)));
    let ctx = context(
        command(stages(&["a", "b"]), MergeStrategy::Parallel),
        provider.clone(),
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;

    assert!(!outcome.success);
    assert!(!outcome.outputs.contains_key("a"));
    assert!(outcome.outputs.contains_key("b"));
    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(outcome.stages[0].status, StageStatus::FailedStage);
    assert_eq!(outcome.stages[1].status, StageStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_branches_overlap_and_later_waves_wait() {
    let provider = Arc::new(ScriptedProvider::new());
    let ctx = context(
        command(
            vec![
                StageSpec::new("lint", "t"),
                StageSpec::new("docs", "t"),
                StageSpec::new("summary", "t")
                    .with_input("lint")
                    .with_input("docs"),
            ],
            MergeStrategy::Parallel,
        ),
        provider.clone(),
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;
    assert!(outcome.success);
    assert_eq!(outcome.outputs.len(), 3);

    let calls = provider.calls();
    let find = |id: &str| calls.iter().find(|c| c.stage == id).unwrap().clone();
    let (lint, docs, summary) = (find("lint"), find("docs"), find("summary"));
    assert!(lint.started < docs.finished && docs.started < lint.finished);
    assert!(summary.started > lint.finished && summary.started > docs.finished);
    assert_eq!(summary.inputs, vec!["docs", "lint"]);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failure_stops_later_waves() {
    let provider = Arc::new(ScriptedProvider::new().with("lint", Behavior::Fail(ErrorKind::Error)));
    let ctx = context(
        command(
            vec![
                StageSpec::new("lint", "t"),
                StageSpec::new("summary", "t").with_input("lint"),
            ],
            MergeStrategy::Parallel,
        ),
        provider.clone(),
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;
    assert!(!outcome.success);
    assert_eq!(provider.calls_for("summary"), 0);
    assert_eq!(outcome.stages[1].status, StageStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausts_max_attempts() {
    let provider = Arc::new(ScriptedProvider::new().with("plan", Behavior::Fail(ErrorKind::Error)));
    let mut cmd = command(stages(&["plan"]), MergeStrategy::Sequential);
    cmd.prompts.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        backoff_ms: 100,
        retry_on: [ErrorKind::Error].into_iter().collect(),
    });
    let ctx = context(cmd, provider.clone(), CancelSignal::never());

    let outcome = PipelineEngine::default().run(&ctx).await;

    assert_eq!(provider.calls_for("plan"), 2);
    assert_eq!(outcome.stages[0].status, StageStatus::FailedStage);
    assert_eq!(outcome.stages[0].attempts, 2);
    assert_eq!(outcome.stages[0].error_kind, Some(ErrorKind::Error));
    let attempts: Vec<u32> = provider.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_kind_fails_immediately() {
    let provider =
        Arc::new(ScriptedProvider::new().with("plan", Behavior::Fail(ErrorKind::InvalidOutput)));
    let mut cmd = command(stages(&["plan"]), MergeStrategy::Sequential);
    cmd.prompts.retry_policy = Some(RetryPolicy {
        max_attempts: 5,
        backoff_ms: 100,
        retry_on: [ErrorKind::Error].into_iter().collect(),
    });
    let ctx = context(cmd, provider.clone(), CancelSignal::never());

    let outcome = PipelineEngine::default().run(&ctx).await;
    assert_eq!(provider.calls_for("plan"), 1);
    assert!(!outcome.success);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_flaky_stage() {
    let provider = Arc::new(
        ScriptedProvider::new().with("plan", Behavior::FailFirst(1, ErrorKind::RateLimited)),
    );
    let mut cmd = command(stages(&["plan"]), MergeStrategy::Sequential);
    cmd.prompts.retry_policy = None;
    let ctx = context(cmd, provider.clone(), CancelSignal::never());

    let engine = PipelineEngine::new(EngineConfig {
        default_retry_policy: RetryPolicy {
            backoff_ms: 50,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    });
    let outcome = engine.run(&ctx).await;

    assert!(outcome.success);
    assert_eq!(outcome.stages[0].attempts, 2);
    assert_eq!(outcome.outputs["plan"]["recovered"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_stage_cache_skips_provider_on_second_run() {
    let cache = Arc::new(MemoryCacheStore::new());
    let engine = PipelineEngine::default().with_cache(CacheLayer::new(cache.clone()));
    let mut cmd = command(stages(&["plan", "code"]), MergeStrategy::Sequential);
    cmd.prompts.cache_strategy = CacheStrategy::Stage;

    let first_provider = Arc::new(ScriptedProvider::new());
    let first = engine
        .run(&context(cmd.clone(), first_provider.clone(), CancelSignal::never()))
        .await;
    assert!(first.success);
    assert_eq!(first_provider.calls().len(), 2);
    assert_eq!(cache.len(), 2);

    let second_provider = Arc::new(ScriptedProvider::new());
    let second = engine
        .run(&context(cmd, second_provider.clone(), CancelSignal::never()))
        .await;
    assert!(second.success);
    assert_eq!(second_provider.calls_for("plan"), 0);
    assert_eq!(second_provider.calls_for("code"), 0);
    assert!(second.stages.iter().all(|s| s.cached && s.attempts == 0));
    assert_eq!(first.outputs, second.outputs);
}

#[tokio::test(start_paused = true)]
async fn test_command_cache_short_circuits_whole_pipeline() {
    let cache = Arc::new(MemoryCacheStore::new());
    let engine = PipelineEngine::default().with_cache(CacheLayer::new(cache.clone()));
    let mut cmd = command(stages(&["plan", "code"]), MergeStrategy::Sequential);
    cmd.prompts.cache_strategy = CacheStrategy::Command;

    let first_provider = Arc::new(ScriptedProvider::new());
    engine
        .run(&context(cmd.clone(), first_provider.clone(), CancelSignal::never()))
        .await;
    assert_eq!(cache.len(), 1);
    assert!(cache.keys().iter().all(|k| k.starts_with("command:implement:")));

    let second_provider = Arc::new(ScriptedProvider::new());
    let second = engine
        .run(&context(cmd, second_provider.clone(), CancelSignal::never()))
        .await;
    assert!(second.cached);
    assert!(second_provider.calls().is_empty());
    assert_eq!(second.outputs.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_is_not_cached() {
    let cache = Arc::new(MemoryCacheStore::new());
    let engine = PipelineEngine::default().with_cache(CacheLayer::new(cache.clone()));
    let mut cmd = command(stages(&["plan"]), MergeStrategy::Sequential);
    cmd.prompts.cache_strategy = CacheStrategy::Command;

    let provider = Arc::new(ScriptedProvider::new().with("plan", Behavior::Fail(ErrorKind::Error)));
    engine
        .run(&context(cmd, provider, CancelSignal::never()))
        .await;
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_between_stages() {
    let (handle, signal) = cancel_pair();
    let handle = Arc::new(handle);
    let trigger = handle.clone();
    let provider = Arc::new(ScriptedProvider::new().on_call(move |stage| {
        if stage == "plan" {
            trigger.cancel();
        }
    }));
    let ctx = context(
        command(stages(&["plan", "code"]), MergeStrategy::Sequential),
        provider.clone(),
        signal,
    );

    let outcome = PipelineEngine::default().run(&ctx).await;

    assert!(!outcome.success);
    assert!(outcome.outputs.contains_key("plan"));
    assert_eq!(provider.calls_for("code"), 0);
    assert_eq!(outcome.stages[1].status, StageStatus::FailedStage);
    assert_eq!(outcome.stages[1].error_kind, Some(ErrorKind::Cancelled));
    assert!(matches!(outcome.error, Some(PipelineError::Cancelled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_stage_role_override_reaches_provider() {
    let provider = Arc::new(ScriptedProvider::new());
    let ctx = context(
        command(
            vec![
                StageSpec::new("code", "t"),
                StageSpec::new("review", "t").with_role("code-reviewer"),
            ],
            MergeStrategy::Sequential,
        ),
        provider,
        CancelSignal::never(),
    );

    let outcome = PipelineEngine::default().run(&ctx).await;
    assert_eq!(outcome.outputs["code"]["role"], json!("software-engineer"));
    assert_eq!(outcome.outputs["review"]["role"], json!("code-reviewer"));
}
