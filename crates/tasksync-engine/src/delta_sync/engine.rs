//! # Delta Sync Engine
//!
//! Incremental replication of one remote collection per scope.
//!
//! A run:
//! 1. takes a slot from the `max_concurrent_syncs` semaphore
//! 2. chooses the full path when forced or when the scope has failed
//!    `fallback_error_threshold` times in a row, the delta path otherwise
//! 3. fetches pages through the governed-call middleware, retrying each page
//!    a fixed number of times
//! 4. applies changes page by page to the resource store
//! 5. persists the continuation token and resets the scope's error counter
//!
//! A delta path whose token the remote no longer recognizes, or whose stored
//! token cannot be decoded, deletes the token and restarts the same run on the
//! full path. A run stopped by `max_pages` stores the next-page link so the
//! following run resumes where it left off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::Value;
use tasksync_shared::collaborators::{
    AuthProvider, HttpMethod, ResourceStore, TokenStore, Transport, TransportRequest,
    TransportResponse,
};
use tasksync_shared::config::DeltaSyncConfig;
use tasksync_shared::models::{DeltaToken, SyncScope};
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::apply::apply_change;
use super::metrics::{SyncMetrics, SyncStatus};
use super::parse::{delta_url, extract_token, resolve_link, ChangeParser, DeltaPage};
use crate::middleware::{check_status, error_code, error_message, governed_send};
use crate::rate_governor::{RateGovernor, RateLimitKey};

/// Remote error codes meaning the continuation token is no longer usable
const RESYNC_ERROR_CODES: [&str; 3] = ["resyncRequired", "syncStateNotFound", "invalidDeltaToken"];

#[derive(Debug, Clone, Default)]
struct ScopeState {
    status: SyncStatus,
    consecutive_errors: u32,
    last_metrics: Option<SyncMetrics>,
}

/// Incremental synchronization against the remote change feed
#[derive(Debug)]
pub struct DeltaSyncEngine {
    config: DeltaSyncConfig,
    base_url: String,
    governor: Arc<RateGovernor>,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    tokens: Arc<dyn TokenStore>,
    resources: Arc<dyn ResourceStore>,
    permits: Semaphore,
    scopes: Mutex<HashMap<SyncScope, ScopeState>>,
}

impl DeltaSyncEngine {
    pub fn new(
        config: DeltaSyncConfig,
        base_url: impl Into<String>,
        governor: Arc<RateGovernor>,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        tokens: Arc<dyn TokenStore>,
        resources: Arc<dyn ResourceStore>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_syncs.max(1));
        Self {
            config,
            base_url: base_url.into(),
            governor,
            transport,
            auth,
            tokens,
            resources,
            permits,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DeltaSyncConfig {
        &self.config
    }

    /// Rate-limit key for a scope's change feed
    pub fn rate_limit_key(&self, scope: &SyncScope) -> RateLimitKey {
        RateLimitKey::new(
            format!("GET /{}/delta", scope.resource_type.trim_matches('/')),
            scope.user_id.clone(),
        )
        .with_tenant(scope.tenant_id.clone())
    }

    /// Synchronize one scope.
    ///
    /// Per-item failures are counted in the returned metrics. A failure of the
    /// run itself increments the scope's error counter and is returned.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn sync(&self, scope: &SyncScope, force_full_sync: bool) -> TaskSyncResult<SyncMetrics> {
        if !self.config.enabled {
            return Err(TaskSyncError::configuration("delta sync is disabled"));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TaskSyncError::configuration("delta sync engine is shut down"))?;

        let previous_errors = self.begin(scope);
        let fallback = previous_errors >= self.config.fallback_error_threshold;
        if fallback {
            warn!(
                consecutive_errors = previous_errors,
                threshold = self.config.fallback_error_threshold,
                "Error threshold reached, falling back to full sync"
            );
        }

        let mut metrics = SyncMetrics::new(scope.clone());
        match self.run(scope, force_full_sync || fallback, &mut metrics).await {
            Ok(()) => {
                metrics.finish(SyncStatus::Completed, None);
                self.finish(scope, &metrics, true);
                info!(
                    processed = metrics.changes_processed,
                    applied = metrics.changes_applied,
                    skipped = metrics.changes_skipped,
                    errored = metrics.changes_errored,
                    pages = metrics.pages_fetched,
                    full_sync = metrics.full_sync_triggered,
                    has_more = metrics.has_more,
                    "Sync completed"
                );
                Ok(metrics)
            }
            Err(err) => {
                metrics.finish(SyncStatus::Failed, Some(err.to_string()));
                let errors = self.finish(scope, &metrics, false);
                warn!(consecutive_errors = errors, error = %err, "Sync failed");
                Err(err)
            }
        }
    }

    /// Synchronize several scopes concurrently, bounded by `max_concurrent_syncs`.
    ///
    /// Results are returned in input order; one scope failing does not stop
    /// the others.
    pub async fn sync_all(
        &self,
        scopes: &[SyncScope],
        force_full_sync: bool,
    ) -> Vec<TaskSyncResult<SyncMetrics>> {
        join_all(scopes.iter().map(|scope| self.sync(scope, force_full_sync))).await
    }

    async fn run(&self, scope: &SyncScope, full: bool, metrics: &mut SyncMetrics) -> TaskSyncResult<()> {
        let bearer = self.auth.get_access_token(&scope.user_id).await?;

        if full {
            return self.full_pass(scope, &bearer, metrics).await;
        }

        let stored = match self.tokens.get(scope).await {
            Err(TaskSyncError::DeltaTokenInvalid { reason, .. }) => {
                warn!(reason = %reason, "Stored delta token unreadable, running full sync");
                return self.full_pass(scope, &bearer, metrics).await;
            }
            other => other?,
        };
        if let Some(token) = &stored {
            let mut used = token.clone();
            used.mark_used();
            self.tokens.save(&used).await?;
        }

        let prior = stored.as_ref().map(|t| t.token.as_str());
        match self.fetch_and_apply(scope, prior, false, &bearer, metrics).await {
            Err(TaskSyncError::DeltaTokenInvalid { reason, .. }) => {
                warn!(reason = %reason, "Delta token rejected, restarting as full sync");
                self.full_pass(scope, &bearer, metrics).await
            }
            other => self.store_token(scope, other?).await,
        }
    }

    async fn full_pass(&self, scope: &SyncScope, bearer: &str, metrics: &mut SyncMetrics) -> TaskSyncResult<()> {
        self.enter_full_sync(scope, metrics).await?;
        let token = self.fetch_and_apply(scope, None, true, bearer, metrics).await?;
        self.store_token(scope, token).await
    }

    async fn enter_full_sync(&self, scope: &SyncScope, metrics: &mut SyncMetrics) -> TaskSyncResult<()> {
        self.tokens.delete(scope).await?;
        metrics.full_sync_triggered = true;
        self.set_status(scope, SyncStatus::FullSyncTriggered);
        Ok(())
    }

    /// Persist the pass's continuation: a delta token, or the next-page link
    /// when the page limit stopped the pass early
    async fn store_token(&self, scope: &SyncScope, token: Option<String>) -> TaskSyncResult<()> {
        let Some(token) = token else {
            debug!("No continuation to persist");
            return Ok(());
        };
        let ttl = Some(self.config.token_ttl()).filter(|ttl| !ttl.is_zero());
        self.tokens
            .save(&DeltaToken::new(scope.clone(), token, ttl))
            .await
    }

    /// Fetch and apply every page of one pass. Returns the continuation token
    /// from the terminal page, or the resolved next-page link when
    /// `max_pages` is reached first.
    async fn fetch_and_apply(
        &self,
        scope: &SyncScope,
        token: Option<&str>,
        full_sync: bool,
        bearer: &str,
        metrics: &mut SyncMetrics,
    ) -> TaskSyncResult<Option<String>> {
        let parser = ChangeParser {
            resource_type: &scope.resource_type,
            etag_field: &self.config.etag_field,
            modified_field: &self.config.modified_field,
            prior_token: token.is_some(),
            full_sync,
        };
        let mut url = delta_url(&self.base_url, scope, token, self.config.page_size);
        let mut pages: u32 = 0;

        loop {
            let page = self.fetch_page(scope, &url, bearer).await?;
            pages += 1;
            metrics.pages_fetched += 1;
            debug!(page = pages, items = page.value.len(), "Fetched delta page");

            self.apply_page(&parser, &page.value, metrics).await;

            if let Some(link) = page.delta_link {
                return Ok(Some(extract_token(&link)));
            }
            match page.next_link {
                Some(next) if pages < self.config.max_pages => {
                    url = resolve_link(&self.base_url, &next);
                }
                Some(next) => {
                    warn!(
                        max_pages = self.config.max_pages,
                        "Page limit reached, next run resumes from the following page"
                    );
                    metrics.has_more = true;
                    return Ok(Some(resolve_link(&self.base_url, &next)));
                }
                None => return Ok(None),
            }
        }
    }

    /// Apply one page item by item. Unreadable items and store failures are
    /// counted against the run without stopping it.
    async fn apply_page(&self, parser: &ChangeParser<'_>, items: &[Value], metrics: &mut SyncMetrics) {
        for item in items {
            let change = match parser.parse(item) {
                Ok(Some(change)) => change,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable change");
                    metrics.record_item_error();
                    continue;
                }
            };
            let applied =
                apply_change(self.resources.as_ref(), &change, self.config.conflict_resolution).await;
            match applied {
                Ok(outcome) => metrics.record(outcome),
                Err(err) => {
                    warn!(
                        resource_id = %change.resource_id,
                        error = %err,
                        "Failed to apply change"
                    );
                    metrics.record_item_error();
                }
            }
        }
    }

    /// Fetch one page with bounded retry (`retry_delay × attempt` between attempts)
    async fn fetch_page(&self, scope: &SyncScope, url: &str, bearer: &str) -> TaskSyncResult<DeltaPage> {
        let key = self.rate_limit_key(scope);
        let mut attempt: u32 = 1;
        loop {
            let request = TransportRequest::new(HttpMethod::Get, url, self.config.request_timeout())
                .with_bearer(bearer);
            let result = governed_send(
                &self.governor,
                self.transport.as_ref(),
                &key,
                request,
                self.config.max_admission_wait(),
            )
            .await
            .and_then(|response| interpret_page(scope, response));

            match result {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < self.config.fetch_attempts => {
                    let delay = self.config.retry_delay() * attempt;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Page fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Remove expired tokens from the store
    pub async fn cleanup_expired_tokens(&self) -> TaskSyncResult<usize> {
        let removed = self.tokens.cleanup_expired().await?;
        info!(removed, "Expired delta tokens cleaned up");
        Ok(removed)
    }

    pub fn scope_status(&self, scope: &SyncScope) -> SyncStatus {
        self.lock_scopes()
            .get(scope)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    pub fn consecutive_errors(&self, scope: &SyncScope) -> u32 {
        self.lock_scopes()
            .get(scope)
            .map_or(0, |state| state.consecutive_errors)
    }

    pub fn last_metrics(&self, scope: &SyncScope) -> Option<SyncMetrics> {
        self.lock_scopes()
            .get(scope)
            .and_then(|state| state.last_metrics.clone())
    }

    /// Forget a scope's status and error counter. The stored token is kept.
    pub fn reset_scope(&self, scope: &SyncScope) {
        self.lock_scopes().remove(scope);
    }

    fn lock_scopes(&self) -> std::sync::MutexGuard<'_, HashMap<SyncScope, ScopeState>> {
        self.scopes.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mark the scope in progress and return its error counter
    fn begin(&self, scope: &SyncScope) -> u32 {
        let mut scopes = self.lock_scopes();
        let state = scopes.entry(scope.clone()).or_default();
        state.status = SyncStatus::InProgress;
        state.consecutive_errors
    }

    fn set_status(&self, scope: &SyncScope, status: SyncStatus) {
        self.lock_scopes().entry(scope.clone()).or_default().status = status;
    }

    /// Record the terminal state of a run and return the scope's error counter
    fn finish(&self, scope: &SyncScope, metrics: &SyncMetrics, success: bool) -> u32 {
        let mut scopes = self.lock_scopes();
        let state = scopes.entry(scope.clone()).or_default();
        state.status = metrics.status;
        state.last_metrics = Some(metrics.clone());
        if success {
            state.consecutive_errors = 0;
        } else {
            state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        }
        state.consecutive_errors
    }
}

/// Map a feed response to a page, recognizing rejected continuation tokens
fn interpret_page(scope: &SyncScope, response: TransportResponse) -> TaskSyncResult<DeltaPage> {
    if !response.is_success() {
        let body = response.json().unwrap_or(Value::Null);
        let resync = response.status == 410
            || error_code(&body)
                .is_some_and(|code| RESYNC_ERROR_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)));
        if resync {
            return Err(TaskSyncError::DeltaTokenInvalid {
                scope: scope.to_string(),
                reason: error_message(&body).unwrap_or_else(|| format!("HTTP {}", response.status)),
            });
        }
    }
    let response = check_status(response)?;
    DeltaPage::from_json(response.json()?)
}
