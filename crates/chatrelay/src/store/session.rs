//! Session storage trait.

use std::path::PathBuf;

use async_trait::async_trait;

use super::error::StorageResult;

/// Storage interface for per-session credential directories.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// List the names of all persisted sessions.
    ///
    /// Used by restore on startup.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// Ensure the session's directory exists and return its path.
    async fn prepare(&self, name: &str) -> StorageResult<PathBuf>;

    /// Delete a session's directory and everything in it.
    ///
    /// Deleting a missing directory succeeds. Returns `StorageError::InUse`
    /// when the directory is still held by another process.
    async fn remove(&self, name: &str) -> StorageResult<()>;
}
