//! # File Token Store
//!
//! Durable `TokenStore` keeping one JSON document per scope under a directory.
//! File names are the hex SHA-256 of the scope's storage key, so arbitrary
//! resource types and user ids never leak into paths.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::collaborators::TokenStore;
use crate::errors::{TaskSyncError, TaskSyncResult};
use crate::models::{DeltaToken, SyncScope};

const TOKEN_FILE_EXTENSION: &str = "json";

/// Directory-backed delta token store
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> TaskSyncResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            TaskSyncError::storage(format!(
                "failed to create token directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope: &SyncScope) -> PathBuf {
        let digest = Sha256::digest(scope.storage_key().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.dir.join(format!("{name}.{TOKEN_FILE_EXTENSION}"))
    }

    async fn read_bytes(path: &Path) -> TaskSyncResult<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskSyncError::storage(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn remove(path: &Path) -> TaskSyncResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TaskSyncError::storage(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, token: &DeltaToken) -> TaskSyncResult<()> {
        let path = self.path_for(&token.scope);
        let bytes = serde_json::to_vec_pretty(token)
            .map_err(|e| TaskSyncError::storage(format!("failed to encode token: {e}")))?;

        // Write-then-rename keeps readers from observing a partial document
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| TaskSyncError::storage(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            TaskSyncError::storage(format!("failed to persist {}: {e}", path.display()))
        })?;

        debug!(scope = %token.scope, "Saved delta token");
        Ok(())
    }

    async fn get(&self, scope: &SyncScope) -> TaskSyncResult<Option<DeltaToken>> {
        let path = self.path_for(scope);
        let Some(bytes) = Self::read_bytes(&path).await? else {
            return Ok(None);
        };
        let token: DeltaToken =
            serde_json::from_slice(&bytes).map_err(|e| TaskSyncError::DeltaTokenInvalid {
                scope: scope.to_string(),
                reason: format!("corrupt token file {}: {e}", path.display()),
            })?;
        Ok(Some(token).filter(|t| !t.is_expired()))
    }

    async fn delete(&self, scope: &SyncScope) -> TaskSyncResult<bool> {
        Self::remove(&self.path_for(scope)).await
    }

    async fn cleanup_expired(&self) -> TaskSyncResult<usize> {
        let now = Utc::now();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| TaskSyncError::storage(format!("failed to list tokens: {e}")))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TaskSyncError::storage(format!("failed to list tokens: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TOKEN_FILE_EXTENSION) {
                continue;
            }
            let decoded = Self::read_bytes(&path).await.and_then(|bytes| {
                bytes
                    .map(|b| serde_json::from_slice::<DeltaToken>(&b))
                    .transpose()
                    .map_err(|e| TaskSyncError::storage(e.to_string()))
            });
            match decoded {
                Ok(Some(token)) if token.is_expired_at(now) => {
                    if Self::remove(&path).await? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable token file"),
            }
        }

        debug!(removed, dir = %self.dir.display(), "Cleaned up expired delta tokens");
        Ok(removed)
    }
}
