//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySessionManager` and `MemoryCacheStore` that satisfy the
//! trait contracts without touching the filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemorySessionManager
// ---------------------------------------------------------------------------

/// In-memory session bound to a single `SessionId`.
#[derive(Debug)]
pub struct MemorySessionManager {
    session_id: SessionId,
    state: Mutex<SessionSnapshot>,
}

impl MemorySessionManager {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = SessionId::new(session_id);
        Self {
            state: Mutex::new(SessionSnapshot::new(session_id.clone())),
            session_id,
        }
    }

    /// Seed a context entry (builder style).
    pub fn with_context(self, key: &str, value: Value) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.context.insert(key.to_string(), value);
        }
        self
    }

    /// Number of recorded commands.
    pub fn command_count(&self) -> usize {
        self.state.lock().unwrap().commands.len()
    }
}

#[async_trait]
impl SessionManager for MemorySessionManager {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn get_session(&self) -> StorageResult<SessionSnapshot> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn set_context(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.context.insert(key.to_string(), value);
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn record_command(&self, record: CommandRecord) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(record);
        state.updated_at = Utc::now();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

/// In-memory cache backed by a `HashMap<key, value>`.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently cached, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}
