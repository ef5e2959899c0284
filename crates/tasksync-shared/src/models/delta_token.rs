//! # Delta Tokens
//!
//! A `DeltaToken` is the opaque continuation cursor for exactly one
//! synchronization scope `(resource type, resource id, user, tenant)`.
//! Tokens carry their own expiry; an expired token is treated as absent.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one synchronization scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncScope {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: String,
    pub tenant_id: Option<String>,
}

impl SyncScope {
    /// Scope over a whole collection for a user
    pub fn new(resource_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            user_id: user_id.into(),
            tenant_id: None,
        }
    }

    /// Narrow the scope to a parent resource
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Attach the owning tenant
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Stable composite key, used for hashing and logging
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.resource_type,
            self.resource_id.as_deref().unwrap_or(""),
            self.user_id,
            self.tenant_id.as_deref().unwrap_or("")
        )
    }

    /// Relative collection path for this scope.
    ///
    /// An `{id}` placeholder in the resource type is replaced with the resource
    /// id; otherwise the id (when present) is appended as a path segment.
    pub fn collection_path(&self) -> String {
        let resource_type = self.resource_type.trim_matches('/');
        let path = match &self.resource_id {
            Some(id) if resource_type.contains("{id}") => resource_type.replace("{id}", id),
            Some(id) => format!("{resource_type}/{id}"),
            None => resource_type.to_string(),
        };
        format!("/{path}")
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource_type)?;
        if let Some(id) = &self.resource_id {
            write!(f, "[{id}]")?;
        }
        write!(f, " user={}", self.user_id)?;
        if let Some(tenant) = &self.tenant_id {
            write!(f, " tenant={tenant}")?;
        }
        Ok(())
    }
}

/// Continuation token for one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaToken {
    pub scope: SyncScope,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DeltaToken {
    /// Create a token that expires `ttl` from now (`None` = never expires)
    pub fn new(scope: SyncScope, token: impl Into<String>, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        Self {
            scope,
            token: token.into(),
            created_at: now,
            last_used_at: None,
            expires_at,
        }
    }

    /// Whether the token is past its expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether the token is past its expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record that the token was attached to a fetch
    pub fn mark_used(&mut self) {
        self.last_used_at = Some(Utc::now());
    }
}
