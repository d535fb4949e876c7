//! cmdflow-state: session and cache storage for cmdflow
//!
//! This crate provides the persistence layer the command execution core
//! talks to. The core only depends on the traits; concrete backends are
//! chosen by the binary.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `SessionManager`: narrow read/write interface onto one session
//! - `CacheStore`: get/set memo for stage and command outputs
//! - `FileSessionManager` / `FsCacheStore`: file-backed implementations
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod file_session;
pub mod fs_cache;
pub mod storage_traits;

pub use error::StorageError;
pub use file_session::FileSessionManager;
pub use fs_cache::FsCacheStore;
pub use storage_traits::{
    merge_context_value, CacheStore, CommandRecord, SessionId, SessionManager, SessionSnapshot,
    StorageResult,
};
