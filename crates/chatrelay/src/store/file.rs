//! File-based session directory store.
//!
//! Directory structure:
//! ```text
//! {sessions_dir}/
//!   {session_name}/      # Owned by the bridge (credentials, browser profile, ...)
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::error::{StorageError, StorageResult};
use super::session::SessionStore;

/// File-based implementation of `SessionStore`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// Create a new store rooted at `sessions_dir`.
    ///
    /// The root is created lazily when the first session is prepared.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn session_dir(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(&self.sessions_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.sessions_dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.sessions_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir && let Some(name) = entry.file_name().to_str() {
                sessions.push(name.to_string());
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    async fn prepare(&self, name: &str) -> StorageResult<PathBuf> {
        let dir = self.session_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;
        Ok(dir)
    }

    async fn remove(&self, name: &str) -> StorageResult<()> {
        let dir = self.session_dir(name);

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ResourceBusy
                        | ErrorKind::PermissionDenied
                        | ErrorKind::DirectoryNotEmpty
                ) =>
            {
                Err(StorageError::in_use(&dir, e))
            }
            Err(e) => Err(StorageError::file_io(&dir, e)),
        }
    }
}
