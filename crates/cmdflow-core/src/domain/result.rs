//! Execution outcomes: `CommandResult` and per-stage `StageReport`.

use std::collections::BTreeMap;

use cmdflow_state::CommandRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::command::ErrorKind;

/// Lifecycle state of one stage within a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Never started (an earlier stage failed or the run was short-circuited).
    Pending,
    Running,
    Retrying,
    Succeeded,
    FailedStage,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::FailedStage)
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage_id: String,
    pub status: StageStatus,
    /// Provider invocations made (0 for cache hits and pre-start cancellation).
    pub attempts: u32,
    /// Output was served from the stage cache.
    pub cached: bool,
    pub duration_ms: u64,
    /// Last error message when the stage failed.
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl StageReport {
    pub fn pending(stage_id: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Pending,
            attempts: 0,
            cached: false,
            duration_ms: 0,
            error: None,
            error_kind: None,
        }
    }
}

/// Result envelope of one command execution. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub agent: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, Value>,
    pub model: Option<String>,
    pub command: String,
    pub session_id: String,
    pub duration_ms: u64,
    /// Stage key -> stage output. Only stages that succeeded appear here.
    pub outputs: BTreeMap<String, Value>,
    pub success: bool,
    /// Pipeline failure description when `success` is false.
    pub error: Option<String>,
    /// Whole result served from the command-level cache.
    pub cached: bool,
    pub stages: Vec<StageReport>,
}

impl CommandResult {
    /// Session history entry for this result.
    pub fn to_record(&self) -> CommandRecord {
        CommandRecord {
            command: self.command.clone(),
            agent: self.agent.clone(),
            args: self.args.clone(),
            outputs: self.outputs.clone(),
            success: self.success,
            duration_ms: self.duration_ms,
            recorded_at: chrono::Utc::now(),
        }
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }
}
