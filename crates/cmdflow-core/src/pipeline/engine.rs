//! Pipeline execution engine.
//!
//! Runs a command's stages against the context's provider with per-stage
//! caching and retry, combining outputs according to the command's merge
//! strategy:
//!
//! - **sequential**: stages run in declared order; stage *i* sees the outputs
//!   of stages `0..i`; the first terminal failure halts the pipeline.
//! - **parallel**: stages run in dependency waves (see [`execution_waves`]);
//!   branches of a wave run concurrently and see the outputs of earlier waves.
//!   Failed branches contribute nothing, and no later wave starts.
//!
//! Stages that never started are reported as `Pending`.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::{
    CacheStrategy, ErrorKind, MergeStrategy, RetryPolicy, StageReport, StageSpec, StageStatus,
};
use crate::obs;
use crate::pipeline::cache::{command_cache_key, stage_cache_key, CacheLayer};
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{PipelineError, StageError};
use crate::pipeline::merge::{execution_waves, merge_outputs};
use crate::pipeline::provider::StageRequest;
use crate::pipeline::retry::execute_with_retry;

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Policy for commands that declare none.
    pub default_retry_policy: RetryPolicy,
    /// Upper bound on concurrently running branches of one wave.
    pub max_concurrent_stages: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retry_policy: RetryPolicy::default(),
            max_concurrent_stages: 4,
        }
    }
}

/// What a pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Outputs of stages that succeeded, keyed by stage id.
    pub outputs: BTreeMap<String, Value>,
    /// One report per declared stage, in declared order.
    pub stages: Vec<StageReport>,
    pub success: bool,
    pub error: Option<PipelineError>,
    /// The whole outcome came from the command-level cache.
    pub cached: bool,
}

struct StageRun {
    index: usize,
    report: StageReport,
    result: Result<Value, StageError>,
}

#[derive(Clone, Default)]
pub struct PipelineEngine {
    cache: CacheLayer,
    config: EngineConfig,
}

impl PipelineEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            cache: CacheLayer::disabled(),
            config,
        }
    }

    /// Builder: memoize through `cache`.
    pub fn with_cache(mut self, cache: CacheLayer) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Retry policy that applies to `ctx`'s command.
    pub fn retry_policy_for<'a>(&'a self, ctx: &'a ExecutionContext) -> &'a RetryPolicy {
        ctx.command()
            .prompts
            .retry_policy
            .as_ref()
            .unwrap_or(&self.config.default_retry_policy)
    }

    /// Execute the command's pipeline. Stage failures are reported in the
    /// outcome, never as an `Err`.
    #[instrument(skip_all, fields(command = %ctx.command_name(), agent = %ctx.agent_role()))]
    pub async fn run(&self, ctx: &ExecutionContext) -> PipelineOutcome {
        let command = ctx.command();
        let stages = command.effective_pipeline();
        let policy = self.retry_policy_for(ctx);

        let command_key = (self.cache.is_enabled()
            && command.prompts.cache_strategy == CacheStrategy::Command)
            .then(|| {
                command_cache_key(
                    ctx.command_name(),
                    ctx.agent_role(),
                    ctx.model(),
                    ctx.args(),
                    ctx.flags(),
                )
            });

        if let Some(key) = &command_key {
            if let Some(outcome) = self.cached_outcome(key, &stages).await {
                return outcome;
            }
        }

        let outcome = match command.prompts.merge_strategy {
            MergeStrategy::Sequential => self.run_sequential(ctx, &stages, policy).await,
            MergeStrategy::Parallel => self.run_parallel(ctx, &stages, policy).await,
        };

        if let (Some(key), true) = (&command_key, outcome.success) {
            match serde_json::to_value(&outcome.outputs) {
                Ok(value) => self.cache.set(key, value).await,
                Err(e) => obs::emit_cache_error(key, &e),
            }
        }

        outcome
    }

    async fn cached_outcome(&self, key: &str, stages: &[StageSpec]) -> Option<PipelineOutcome> {
        let value = self.cache.get("command", key).await?;
        let outputs: BTreeMap<String, Value> = match serde_json::from_value(value) {
            Ok(outputs) => outputs,
            Err(e) => {
                obs::emit_cache_error(key, &e);
                return None;
            }
        };
        let reports = stages
            .iter()
            .map(|s| StageReport {
                status: StageStatus::Succeeded,
                cached: true,
                ..StageReport::pending(&s.id)
            })
            .collect();
        Some(PipelineOutcome {
            outputs,
            stages: reports,
            success: true,
            error: None,
            cached: true,
        })
    }

    async fn run_sequential(
        &self,
        ctx: &ExecutionContext,
        stages: &[StageSpec],
        policy: &RetryPolicy,
    ) -> PipelineOutcome {
        let mut outputs = BTreeMap::new();
        let mut reports: Vec<StageReport> = stages.iter().map(|s| StageReport::pending(&s.id)).collect();
        let mut error = None;

        for (index, stage) in stages.iter().enumerate() {
            let run = self
                .run_stage(ctx, index, stage, outputs.clone(), policy)
                .await;
            let attempts = run.report.attempts;
            reports[index] = run.report;
            match run.result {
                Ok(value) => {
                    outputs.insert(stage.id.clone(), value);
                }
                Err(e) => {
                    error = Some(pipeline_failure(&stage.id, attempts, e));
                    break;
                }
            }
        }

        finish(outputs, reports, error)
    }

    async fn run_parallel(
        &self,
        ctx: &ExecutionContext,
        stages: &[StageSpec],
        policy: &RetryPolicy,
    ) -> PipelineOutcome {
        let mut outputs = BTreeMap::new();
        let mut reports: Vec<StageReport> = stages.iter().map(|s| StageReport::pending(&s.id)).collect();
        let mut error = None;
        let width = self.config.max_concurrent_stages.max(1);

        for wave in execution_waves(stages) {
            debug!(stages = wave.len(), "starting wave");
            let visible = outputs.clone();
            let branches: Vec<_> = wave
                .iter()
                .map(|&i| self.run_stage(ctx, i, &stages[i], visible.clone(), policy))
                .collect();
            let mut runs: Vec<StageRun> = stream::iter(branches)
                .buffer_unordered(width)
                .collect()
                .await;
            runs.sort_by_key(|r| r.index);

            let mut completed = Vec::new();
            for run in runs {
                let stage_id = stages[run.index].id.clone();
                let attempts = run.report.attempts;
                reports[run.index] = run.report;
                match run.result {
                    Ok(value) => completed.push((stage_id, value)),
                    Err(e) => {
                        if error.is_none() {
                            error = Some(pipeline_failure(&stage_id, attempts, e));
                        }
                    }
                }
            }
            merge_outputs(&mut outputs, completed);

            if error.is_some() {
                break;
            }
        }

        finish(outputs, reports, error)
    }

    async fn run_stage(
        &self,
        ctx: &ExecutionContext,
        index: usize,
        stage: &StageSpec,
        inputs: BTreeMap<String, Value>,
        policy: &RetryPolicy,
    ) -> StageRun {
        let started = Instant::now();
        let mut report = StageReport::pending(&stage.id);

        if ctx.is_cancelled() {
            report.status = StageStatus::FailedStage;
            report.error_kind = Some(ErrorKind::Cancelled);
            report.error = Some("cancelled before start".to_string());
            obs::emit_stage_finished(&stage.id, report.status, 0, 0);
            return StageRun {
                index,
                report,
                result: Err(StageError::cancelled(format!("stage {} not started", stage.id))),
            };
        }

        let request = StageRequest {
            command: ctx.command_name().to_string(),
            stage_id: stage.id.clone(),
            template: stage.template.clone(),
            agent_role: ctx.stage_role(stage).to_string(),
            model: ctx.model().map(str::to_string),
            args: ctx.args().to_vec(),
            flags: ctx.flags().clone(),
            inputs,
            attempt: 0,
        };

        let stage_key = (self.cache.is_enabled()
            && ctx.command().prompts.cache_strategy == CacheStrategy::Stage)
            .then(|| stage_cache_key(&request));

        if let Some(key) = &stage_key {
            if let Some(value) = self.cache.get("stage", key).await {
                report.status = StageStatus::Succeeded;
                report.cached = true;
                obs::emit_stage_finished(&stage.id, report.status, 0, 0);
                return StageRun {
                    index,
                    report,
                    result: Ok(value),
                };
            }
        }

        obs::emit_stage_started(&request.command, &stage.id, &request.agent_role);
        let provider = ctx.provider();
        let base = &request;
        let status = &mut report.status;
        let outcome = execute_with_retry(
            &stage.id,
            policy,
            || ctx.is_cancelled(),
            |next, attempt| {
                *status = next;
                obs::emit_stage_status(&stage.id, next, attempt);
            },
            |attempt| {
                let mut request = base.clone();
                request.attempt = attempt;
                async move { provider.invoke(stage, &request).await }
            },
        )
        .await;

        report.attempts = outcome.attempts;
        report.duration_ms = started.elapsed().as_millis() as u64;
        match &outcome.result {
            Ok(value) => {
                report.status = StageStatus::Succeeded;
                if let Some(key) = &stage_key {
                    self.cache.set(key, value.clone()).await;
                }
            }
            Err(e) => {
                report.status = StageStatus::FailedStage;
                report.error = Some(e.message.clone());
                report.error_kind = Some(e.kind);
            }
        }
        obs::emit_stage_finished(&stage.id, report.status, report.attempts, report.duration_ms);

        StageRun {
            index,
            report,
            result: outcome.result,
        }
    }
}

fn pipeline_failure(stage_id: &str, attempts: u32, error: StageError) -> PipelineError {
    if error.kind == ErrorKind::Cancelled {
        PipelineError::Cancelled {
            stage: stage_id.to_string(),
        }
    } else {
        PipelineError::StageFailed {
            stage: stage_id.to_string(),
            attempts,
            source: error,
        }
    }
}

fn finish(
    outputs: BTreeMap<String, Value>,
    stages: Vec<StageReport>,
    error: Option<PipelineError>,
) -> PipelineOutcome {
    PipelineOutcome {
        outputs,
        stages,
        success: error.is_none(),
        error,
        cached: false,
    }
}
