//! cmdflow core library
//!
//! Executes named commands: resolves the agent that should run a task,
//! builds an execution context, and runs the command's staged pipeline with
//! caching, retry and output merging, recording every outcome in a session.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod obs;
pub mod pipeline;
pub mod selection;
pub mod telemetry;

pub use config::{ConfigError, OrchestratorConfig};

pub use coordinator::{
    DirectStrategy, ExecutionCoordinator, ExecutionOptions, ExecutionResult, ExecutionStrategy,
    PipelineStrategy, ResolvedCommand, StrategyRegistry,
};

pub use domain::{
    AgentSelection, Alternative, CacheStrategy, CommandDefinition, CommandKind, CommandResult,
    ErrorKind, MergeStrategy, OrchestratorError, OrchestratorResult, PromptsConfig, RetryPolicy,
    StageReport, StageSpec, StageStatus, TaskSignal, SELECTION_CONTEXT_KEY,
};

pub use obs::{
    emit_agent_fallback, emit_agent_selected, emit_cache_hit, emit_command_finished,
    emit_stage_finished, emit_stage_retry, emit_stage_started, CommandSpan,
};

pub use pipeline::{
    cancel_pair, CacheLayer, CancelHandle, CancelSignal, EngineConfig, ExecutionContext,
    ModelProvider, PipelineEngine, PipelineError, StageError, StageRequest,
};

pub use selection::{
    CapabilityRecord, CapabilityRegistry, CapabilitySource, DynamicAgentResolver, ResolverConfig,
    SelectionError, TaskClassifier,
};

pub use telemetry::init_tracing;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
