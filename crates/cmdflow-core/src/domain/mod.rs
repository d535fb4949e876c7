//! Domain types shared by the selection, pipeline and coordinator layers.

pub mod command;
pub mod error;
pub mod result;
pub mod selection;

pub use command::{
    CacheStrategy, CommandDefinition, CommandKind, ErrorKind, MergeStrategy, PromptsConfig,
    RetryPolicy, StageSpec,
};
pub use error::{OrchestratorError, OrchestratorResult};
pub use result::{CommandResult, StageReport, StageStatus};
pub use selection::{
    AgentCandidate, AgentSelection, Alternative, TaskSignal, SELECTION_CONTEXT_KEY,
};
