//! Pipeline execution: stages, caching, retry, and output merging.
//!
//! # Module layout
//!
//! - [`context`]: `ExecutionContext`, `ContextParams`, cancellation
//! - [`provider`]: `ModelProvider` seam and `StageRequest`
//! - [`engine`]: `PipelineEngine::run`, `EngineConfig`, `PipelineOutcome`
//! - [`retry`]: `execute_with_retry` (fixed backoff)
//! - [`cache`]: cache keys and `CacheLayer`
//! - [`merge`]: dependency waves and shallow output merge
//! - [`error`]: `StageError`, `PipelineError`

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod merge;
pub mod provider;
pub mod retry;

pub use cache::{command_cache_key, stage_cache_key, CacheLayer};
pub use context::{cancel_pair, CancelHandle, CancelSignal, ContextParams, ExecutionContext};
pub use engine::{EngineConfig, PipelineEngine, PipelineOutcome};
pub use error::{PipelineError, StageError};
pub use merge::{execution_waves, merge_outputs};
pub use provider::{ModelProvider, StageRequest};
pub use retry::{execute_with_retry, RetryOutcome};
