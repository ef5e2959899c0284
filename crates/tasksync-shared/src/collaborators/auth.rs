//! Credential acquisition capability.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{TaskSyncError, TaskSyncResult};

/// Supplies bearer tokens for a user. Refresh is the provider's concern.
#[async_trait]
pub trait AuthProvider: Send + Sync + std::fmt::Debug {
    async fn get_access_token(&self, user_id: &str) -> TaskSyncResult<String>;
}

/// Fixed tokens per user, with an optional fallback for any user.
///
/// Intended for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    tokens: HashMap<String, String>,
    fallback: Option<String>,
}

impl StaticAuthProvider {
    /// Provider that returns the same token for every user
    pub fn shared(token: impl Into<String>) -> Self {
        Self {
            tokens: HashMap::new(),
            fallback: Some(token.into()),
        }
    }

    /// Register a token for a specific user
    pub fn with_user_token(mut self, user_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(user_id.into(), token.into());
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn get_access_token(&self, user_id: &str) -> TaskSyncResult<String> {
        self.tokens
            .get(user_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| TaskSyncError::Auth(format!("no credential for user {user_id}")))
    }
}
