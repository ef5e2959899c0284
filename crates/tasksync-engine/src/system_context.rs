//! # System Context
//!
//! Composition root. Builds the rate governor, batch scheduler and delta sync
//! engine from a `TaskSyncConfig` and a set of collaborators, sharing one
//! governor (and therefore one admission state per key) between them.

use std::sync::Arc;

use tasksync_shared::collaborators::{
    AuthProvider, FileTokenStore, HttpTransport, InMemoryResourceStore, InMemoryTokenStore,
    ResourceStore, StaticAuthProvider, TokenStore, Transport,
};
use tasksync_shared::config::TaskSyncConfig;
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tracing::info;

use crate::batch::BatchScheduler;
use crate::delta_sync::DeltaSyncEngine;
use crate::rate_governor::RateGovernor;

/// Environment variable holding a bearer token shared by every user
pub const ACCESS_TOKEN_ENV: &str = "TASKSYNC_ACCESS_TOKEN";

/// Collaborators injected into the core
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub auth: Arc<dyn AuthProvider>,
    pub tokens: Arc<dyn TokenStore>,
    pub resources: Arc<dyn ResourceStore>,
}

/// Wired components sharing one rate governor
#[derive(Debug, Clone)]
pub struct SystemContext {
    pub config: Arc<TaskSyncConfig>,
    pub governor: Arc<RateGovernor>,
    pub scheduler: Arc<BatchScheduler>,
    pub delta: Arc<DeltaSyncEngine>,
    pub collaborators: Collaborators,
}

impl SystemContext {
    /// Wire components around explicit collaborators
    pub fn with_collaborators(config: TaskSyncConfig, collaborators: Collaborators) -> Self {
        let governor = Arc::new(RateGovernor::new(config.governor.clone()));
        let scheduler = BatchScheduler::new(
            config.batch.clone(),
            config.remote.base_url.clone(),
            governor.clone(),
            collaborators.transport.clone(),
        )
        .with_auth(collaborators.auth.clone());
        let delta = DeltaSyncEngine::new(
            config.delta.clone(),
            config.remote.base_url.clone(),
            governor.clone(),
            collaborators.transport.clone(),
            collaborators.auth.clone(),
            collaborators.tokens.clone(),
            collaborators.resources.clone(),
        );

        Self {
            config: Arc::new(config),
            governor,
            scheduler: Arc::new(scheduler),
            delta: Arc::new(delta),
            collaborators,
        }
    }

    /// Wire components with the default adapters: `reqwest` transport, a
    /// shared token from `TASKSYNC_ACCESS_TOKEN`, a file token store when
    /// `delta.token_store_dir` is set, and an in-memory resource store.
    pub async fn from_config(config: TaskSyncConfig) -> TaskSyncResult<Self> {
        let transport = HttpTransport::new(config.remote.request_timeout())
            .map_err(|e| TaskSyncError::configuration(e.to_string()))?;

        let auth = match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => StaticAuthProvider::shared(token),
            _ => StaticAuthProvider::default(),
        };

        let tokens: Arc<dyn TokenStore> = match &config.delta.token_store_dir {
            Some(dir) => Arc::new(FileTokenStore::open(dir).await?),
            None => Arc::new(InMemoryTokenStore::new()),
        };

        info!(
            base_url = %config.remote.base_url,
            request_timeout_ms = config.remote.request_timeout_ms,
            governor_enabled = config.governor.enabled,
            delta_enabled = config.delta.enabled,
            token_store = config.delta.token_store_dir.as_deref().unwrap_or("memory"),
            "System context initialized"
        );

        Ok(Self::with_collaborators(
            config,
            Collaborators {
                transport: Arc::new(transport),
                auth: Arc::new(auth),
                tokens,
                resources: Arc::new(InMemoryResourceStore::new()),
            },
        ))
    }
}
