//! Storage trait definitions for cmdflow
//!
//! These traits define the two storage seams the execution core talks to:
//! - `SessionManager`: the active session's key/value context and command history
//! - `CacheStore`: memoized stage and command outputs (get/set by key)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module; file-backed implementations live in
//! `fs_cache` and `file_session`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Identifier of a cross-command session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One executed command, appended to the session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Command name (e.g. "implement")
    pub command: String,
    /// Agent role that executed the command
    pub agent: String,
    /// Positional arguments the command ran with
    #[serde(default)]
    pub args: Vec<String>,
    /// Stage key -> stage output
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Whether every stage succeeded
    pub success: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// When the record was appended
    pub recorded_at: DateTime<Utc>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Arbitrary key/value context (`targetFiles`, `dependencies`, ...)
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Executed commands, oldest first
    #[serde(default)]
    pub commands: Vec<CommandRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Create an empty session.
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            context: Map::new(),
            commands: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up a single context value.
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Outputs of the latest successful execution of every command, keyed
    /// `"<command>.<stage>"`.
    pub fn stage_outputs(&self) -> BTreeMap<String, Value> {
        let mut outputs = BTreeMap::new();
        for record in self.commands.iter().filter(|r| r.success) {
            for (stage, value) in &record.outputs {
                outputs.insert(format!("{}.{}", record.command, stage), value.clone());
            }
        }
        outputs
    }
}

/// Shallow-merge `incoming` into `existing`.
///
/// Two JSON objects merge key-wise (incoming keys win); any other combination
/// replaces the existing value.
pub fn merge_context_value(existing: Option<Value>, incoming: Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Object(mut base)), Value::Object(update)) => {
            for (k, v) in update {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

/// Narrow interface onto one active session.
///
/// The execution core never creates or destroys sessions; it only reads and
/// writes through this trait. Implementations must serialize writes for a
/// given session id.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Id of the session this manager is bound to.
    fn session_id(&self) -> &SessionId;

    /// Full snapshot of the session.
    async fn get_session(&self) -> StorageResult<SessionSnapshot>;

    /// Replace the value under `key`.
    async fn set_context(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Append a command to the session history.
    async fn record_command(&self, record: CommandRecord) -> StorageResult<()>;

    /// Value under `key`, if any.
    async fn get_context(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.get_session().await?.context.get(key).cloned())
    }

    /// Every context entry.
    async fn get_all_context(&self) -> StorageResult<Map<String, Value>> {
        Ok(self.get_session().await?.context)
    }

    /// Latest successful stage outputs, keyed `"<command>.<stage>"`.
    async fn get_stage_outputs(&self) -> StorageResult<BTreeMap<String, Value>> {
        Ok(self.get_session().await?.stage_outputs())
    }

    /// Shallow-merge `value` into the value under `key`.
    async fn update_context(&self, key: &str, value: Value) -> StorageResult<()> {
        let existing = self.get_context(key).await?;
        self.set_context(key, merge_context_value(existing, value))
            .await
    }
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Key/value memo for stage and command outputs.
///
/// Guarantees:
/// - `get(key)` returns `None` for keys never `set`.
/// - `get(key)` after `set(key, v)` returns `v` until overwritten.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached value for `key`, if present.
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Store `value` under `key`, overwriting any previous entry.
    async fn set(&self, key: &str, value: Value) -> StorageResult<()>;
}
