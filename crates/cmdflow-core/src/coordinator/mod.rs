//! Execution coordination: agent resolution, context construction, and
//! strategy dispatch for one command invocation.
//!
//! # Module layout
//!
//! - [`execution`]: `ExecutionCoordinator::execute_command`, `ResolvedCommand`,
//!   `ExecutionOptions`, `ExecutionResult`
//! - [`strategy`]: `ExecutionStrategy`, `PipelineStrategy`, `DirectStrategy`,
//!   `StrategyRegistry`

pub mod execution;
pub mod strategy;

pub use execution::{ExecutionCoordinator, ExecutionOptions, ExecutionResult, ResolvedCommand};
pub use strategy::{
    DirectStrategy, ExecutionStrategy, PipelineStrategy, StrategyRegistry, ANY_PROVIDER,
};
