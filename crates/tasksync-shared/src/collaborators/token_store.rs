//! # Token Store
//!
//! Persistence capability for delta tokens. At most one token is stored per
//! scope; saving replaces any previous token. Implementations must treat an
//! expired token as absent on `get`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::TaskSyncResult;
use crate::models::{DeltaToken, SyncScope};

/// Delta token persistence
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace the token for its scope
    async fn save(&self, token: &DeltaToken) -> TaskSyncResult<()>;

    /// Fetch the valid token for a scope, if any.
    ///
    /// A stored token that can no longer be decoded is reported as
    /// `DeltaTokenInvalid`; callers delete it and start over.
    async fn get(&self, scope: &SyncScope) -> TaskSyncResult<Option<DeltaToken>>;

    /// Remove the token for a scope. Returns whether one existed.
    async fn delete(&self, scope: &SyncScope) -> TaskSyncResult<bool>;

    /// Remove every expired token. Returns the number removed.
    async fn cleanup_expired(&self) -> TaskSyncResult<usize>;
}

/// In-process token store
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<SyncScope, DeltaToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens, expired ones included
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn save(&self, token: &DeltaToken) -> TaskSyncResult<()> {
        self.tokens
            .write()
            .await
            .insert(token.scope.clone(), token.clone());
        Ok(())
    }

    async fn get(&self, scope: &SyncScope) -> TaskSyncResult<Option<DeltaToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(scope).filter(|t| !t.is_expired()).cloned())
    }

    async fn delete(&self, scope: &SyncScope) -> TaskSyncResult<bool> {
        Ok(self.tokens.write().await.remove(scope).is_some())
    }

    async fn cleanup_expired(&self) -> TaskSyncResult<usize> {
        let now = Utc::now();
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired_at(now));
        let removed = before - tokens.len();
        debug!(removed, "Cleaned up expired delta tokens");
        Ok(removed)
    }
}
