//! Structured observability hooks for command execution.
//!
//! This module provides:
//! - Command-scoped tracing spans via `CommandSpan` RAII guard
//! - Emission functions for lifecycle events: agent selection, stage
//!   start/retry/finish, cache hits, command completion
//!
//! Events are emitted at `info!` level unless noted (filter via `CMDFLOW_LOG`
//! or `RUST_LOG`).

use tracing::{debug, info, warn};

use crate::domain::{AgentSelection, ErrorKind, StageStatus};

/// RAII guard that enters a command-scoped span for the duration of one
/// `execute_command` call.
///
/// ```ignore
/// let _span = CommandSpan::enter("implement", "session-1");
/// ```
pub struct CommandSpan {
    _span: tracing::span::EnteredSpan,
}

impl CommandSpan {
    pub fn enter(command: &str, session_id: &str) -> Self {
        let span = tracing::info_span!("cmdflow.command", command = %command, session_id = %session_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: dynamic agent selection produced a winner.
///
/// The message text `Dynamic agent selected: <role>` is stable.
pub fn emit_agent_selected(command: &str, role: &str, selection: &AgentSelection) {
    info!(
        event = "agent.selected",
        command = %command,
        role = %role,
        confidence = selection.confidence,
        reasons = ?selection.reasons,
        "Dynamic agent selected: {role}"
    );
}

/// Emit event: dynamic resolution failed or was inconclusive (warning level).
pub fn emit_agent_fallback(command: &str, role: &str, reason: &dyn std::fmt::Display) {
    warn!(
        event = "agent.fallback",
        command = %command,
        role = %role,
        reason = %reason,
        "Dynamic agent selection fell back to {role}"
    );
}

pub fn emit_stage_started(command: &str, stage_id: &str, role: &str) {
    info!(event = "stage.started", command = %command, stage = %stage_id, role = %role);
}

/// Emit event: a stage attempt failed with a retryable kind (warning level).
pub fn emit_stage_retry(stage_id: &str, attempt: u32, kind: ErrorKind, backoff_ms: u64) {
    warn!(
        event = "stage.retry",
        stage = %stage_id,
        attempt = attempt,
        kind = %kind,
        backoff_ms = backoff_ms,
    );
}

/// Emit event: a stage changed state (`Running` before each attempt,
/// `Retrying` before each backoff).
pub fn emit_stage_status(stage_id: &str, status: StageStatus, attempt: u32) {
    debug!(event = "stage.status", stage = %stage_id, status = ?status, attempt = attempt);
}

pub fn emit_stage_finished(stage_id: &str, status: StageStatus, attempts: u32, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage_id,
        status = ?status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: output served from the cache (`scope` is `stage` or `command`).
pub fn emit_cache_hit(scope: &str, key: &str) {
    info!(event = "cache.hit", scope = %scope, key = %key);
}

/// Emit event: cache backend error, treated as a miss (warning level).
pub fn emit_cache_error(key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cache.error", key = %key, error = %error);
}

pub fn emit_command_finished(command: &str, agent: &str, duration_ms: u64, success: bool) {
    info!(
        event = "command.finished",
        command = %command,
        agent = %agent,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: session write failed after execution (warning level).
pub fn emit_session_write_error(session_id: &str, key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "session.write_error", session_id = %session_id, key = %key, error = %error);
}
