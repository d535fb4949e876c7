use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{CacheStore, StorageResult};

/// Filesystem-backed cache with git-style 2-char sharding.
///
/// Layout: `<root>/cache/<first 2 hex chars>/<remaining hex chars>.json`,
/// where the hex string is the SHA-256 of the cache key.
pub struct FsCacheStore {
    cache_dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: Value,
}

impl FsCacheStore {
    /// Create a new `FsCacheStore` rooted at `root`. Creates `root/cache/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let cache_dir = root.as_ref().join("cache");
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hex = hex::encode(Sha256::digest(key.as_bytes()));
        self.cache_dir
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let shard_dir = path.parent().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "cache entry path has no parent",
        ))
    })?;
    std::fs::create_dir_all(shard_dir)?;

    // Write to a temp file in the same directory, then rename over the target.
    let mut tmp = NamedTempFile::new_in(shard_dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        // Digest collision or foreign file: treat as a miss.
        if entry.key != key {
            tracing::warn!(key = %key, stored_key = %entry.key, "cache entry key mismatch");
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let path = self.entry_path(key);
        let bytes = serde_json::to_vec(&CacheEntry {
            key: key.to_string(),
            value,
        })?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
