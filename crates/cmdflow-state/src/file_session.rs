//! JSON-file-backed session manager.
//!
//! Each session lives in `<root>/sessions/<session_id>.json`. The whole
//! snapshot is rewritten atomically on every mutation; writes within one
//! process are serialized by an async mutex.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

pub struct FileSessionManager {
    session_id: SessionId,
    path: PathBuf,
    state: Mutex<SessionSnapshot>,
}

impl FileSessionManager {
    /// Open an existing session. Returns `StorageError::SessionNotFound` if absent.
    pub async fn load(root: impl AsRef<Path>, session_id: &str) -> StorageResult<Self> {
        let path = session_path(root.as_ref(), session_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::SessionNotFound {
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let snapshot: SessionSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            session_id: snapshot.session_id.clone(),
            path,
            state: Mutex::new(snapshot),
        })
    }

    /// Open a session, creating and persisting an empty one if absent.
    pub async fn open_or_create(root: impl AsRef<Path>, session_id: &str) -> StorageResult<Self> {
        match Self::load(root.as_ref(), session_id).await {
            Ok(manager) => Ok(manager),
            Err(StorageError::SessionNotFound { .. }) => {
                debug!(session_id = %session_id, "creating new session file");
                let snapshot = SessionSnapshot::new(SessionId::new(session_id));
                let path = session_path(root.as_ref(), session_id)?;
                persist(&path, &snapshot).await?;
                Ok(Self {
                    session_id: snapshot.session_id.clone(),
                    path,
                    state: Mutex::new(snapshot),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy of the snapshot and persist it. The in-memory
    /// snapshot only changes once the file write succeeded.
    async fn commit<F>(&self, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut SessionSnapshot) + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        mutate(&mut next);
        next.updated_at = Utc::now();
        persist(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

/// `<root>/sessions/<session_id>.json`. Ids that could name a file outside
/// `<root>/sessions` are rejected.
fn session_path(root: &Path, session_id: &str) -> StorageResult<PathBuf> {
    let invalid = session_id.trim().is_empty()
        || session_id.contains("..")
        || session_id.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(StorageError::InvalidSessionId {
            session_id: session_id.to_string(),
        });
    }
    Ok(root.join("sessions").join(format!("{session_id}.json")))
}

async fn persist(path: &Path, snapshot: &SessionSnapshot) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> StorageResult<()> {
        let dir = path.parent().ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "session path has no parent",
            ))
        })?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[async_trait]
impl SessionManager for FileSessionManager {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn get_session(&self) -> StorageResult<SessionSnapshot> {
        Ok(self.state.lock().await.clone())
    }

    async fn set_context(&self, key: &str, value: Value) -> StorageResult<()> {
        self.commit(|state| {
            state.context.insert(key.to_string(), value);
        })
        .await
    }

    async fn record_command(&self, record: CommandRecord) -> StorageResult<()> {
        self.commit(|state| state.commands.push(record)).await
    }

    async fn update_context(&self, key: &str, value: Value) -> StorageResult<()> {
        self.commit(|state| {
            let merged = merge_context_value(state.context.remove(key), value);
            state.context.insert(key.to_string(), merged);
        })
        .await
    }
}
