//! # Batch Scheduler
//!
//! Executes built batches as one combined remote call.
//!
//! Each execution:
//! 1. takes a slot from the `max_concurrent_batches` semaphore
//! 2. sends operations in the order fixed when the batch was built
//! 3. sends the combined request through the governed-call middleware
//!    (admission wait, timeout, outcome recording)
//! 4. retries retryable failures of the whole call with governor backoff
//! 5. demultiplexes nested responses onto operations

use std::collections::HashSet;
use std::sync::Arc;

use tasksync_shared::collaborators::{AuthProvider, HttpMethod, Transport, TransportRequest};
use tasksync_shared::config::BatchConfig;
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::builder::BatchBuilder;
use super::operation::OperationSpec;
use super::request::{BatchRequest, BatchStatus};
use super::response::{demultiplex, BatchResponse};
use crate::middleware::{check_status, governed_send};
use crate::rate_governor::{RateGovernor, RateLimitKey};

/// Dependency-ordered batch execution against the remote batch endpoint
#[derive(Debug)]
pub struct BatchScheduler {
    config: BatchConfig,
    base_url: String,
    governor: Arc<RateGovernor>,
    transport: Arc<dyn Transport>,
    auth: Option<Arc<dyn AuthProvider>>,
    permits: Arc<Semaphore>,
}

impl BatchScheduler {
    pub fn new(
        config: BatchConfig,
        base_url: impl Into<String>,
        governor: Arc<RateGovernor>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            config,
            base_url: base_url.into(),
            governor,
            transport,
            auth: None,
            permits,
        }
    }

    /// Attach the credential provider used by `execute_for_user`
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// An empty builder sized for this scheduler
    pub fn builder(&self) -> BatchBuilder {
        BatchBuilder::new(self.config.max_operations).with_ordering(self.config.ordering)
    }

    /// Rate-limit key for a batch owner
    pub fn rate_limit_key(&self, user_id: &str, tenant_id: Option<&str>) -> RateLimitKey {
        RateLimitKey::new(format!("POST {}", self.config.endpoint), user_id)
            .with_tenant(tenant_id.map(str::to_string))
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.config.endpoint.trim_start_matches('/')
        )
    }

    /// Execute a batch using the owner's token from the auth provider
    pub async fn execute_for_user(&self, batch: BatchRequest) -> TaskSyncResult<BatchResponse> {
        let auth = self
            .auth
            .as_ref()
            .ok_or_else(|| TaskSyncError::configuration("batch scheduler has no auth provider"))?;
        let token = auth.get_access_token(&batch.user_id).await?;
        self.execute(batch, &token).await
    }

    /// Execute a batch as one combined call.
    ///
    /// Per-operation failures are recorded on the operations. Only a failure
    /// of the combined call itself (after retries) is returned as an error.
    pub async fn execute(
        &self,
        mut batch: BatchRequest,
        auth_token: &str,
    ) -> TaskSyncResult<BatchResponse> {
        self.execute_in_place(&mut batch, auth_token).await
    }

    /// Like [`execute`](Self::execute), but leaves `batch` with its terminal
    /// status: `Completed`, or `Failed` when the call or its response fails.
    #[instrument(skip(self, batch, auth_token), fields(batch_id = %batch.id, user_id = %batch.user_id))]
    pub async fn execute_in_place(
        &self,
        batch: &mut BatchRequest,
        auth_token: &str,
    ) -> TaskSyncResult<BatchResponse> {
        if batch.status != BatchStatus::Pending {
            return Err(TaskSyncError::validation(format!(
                "batch {} was already executed (status {})",
                batch.id, batch.status
            )));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TaskSyncError::configuration("batch scheduler is shut down"))?;

        batch.status = BatchStatus::Processing;
        let key = self.rate_limit_key(&batch.user_id, batch.tenant_id.as_deref());
        let execution_ids = batch.ordered_ids();
        let payload = batch.to_wire(&batch.execution_order);
        let url = self.endpoint_url();

        debug!(operations = batch.operations.len(), "Executing batch");

        let mut attempt: u32 = 1;
        let response = loop {
            let request = TransportRequest::new(HttpMethod::Post, &url, self.config.batch_timeout())
                .with_bearer(auth_token)
                .with_json(payload.clone());

            let result = governed_send(
                &self.governor,
                self.transport.as_ref(),
                &key,
                request,
                self.config.max_admission_wait(),
            )
            .await
            .and_then(check_status);

            match result {
                Ok(response) => break response,
                Err(err) if err.is_retryable() => {
                    match self.governor.compute_backoff_for_key(&key, attempt) {
                        Some(delay) => {
                            warn!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Batch call failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            warn!(attempt, error = %err, "Batch call failed, retries exhausted");
                            batch.complete(BatchStatus::Failed);
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Batch call failed with unrecoverable error");
                    batch.complete(BatchStatus::Failed);
                    return Err(err);
                }
            }
        };

        let demuxed = response
            .json()
            .and_then(|body| demultiplex(batch, &body, self.config.conditional_policy));
        if let Err(err) = demuxed {
            warn!(error = %err, "Batch response could not be read");
            batch.complete(BatchStatus::Failed);
            return Err(err);
        }
        batch.complete(BatchStatus::Completed);

        info!(
            succeeded = batch.success_count,
            failed = batch.failure_count,
            skipped = batch.skipped_count(),
            attempts = attempt,
            "Batch completed"
        );

        Ok(BatchResponse {
            http_status: response.status,
            attempts: attempt,
            execution_order: execution_ids,
            batch: batch.clone(),
        })
    }

    /// Split `specs` into batches of at most `max_operations`, in order, and
    /// execute them one after another.
    ///
    /// Dependencies on operations in an earlier chunk are satisfied by the
    /// sequential execution and dropped; dependencies on a later chunk fail
    /// that chunk's build.
    #[instrument(skip(self, specs, auth_token), fields(operations = specs.len()))]
    pub async fn execute_chunked(
        &self,
        specs: Vec<OperationSpec>,
        user_id: &str,
        tenant_id: Option<&str>,
        auth_token: &str,
    ) -> TaskSyncResult<Vec<BatchResponse>> {
        if specs.is_empty() {
            return Err(TaskSyncError::validation("no operations to execute"));
        }

        let chunk_size = self.config.max_operations.max(1);
        let mut earlier: HashSet<String> = HashSet::new();
        let mut responses = Vec::new();
        let mut specs = specs.into_iter().peekable();

        while specs.peek().is_some() {
            let mut builder = self.builder();
            for mut spec in specs.by_ref().take(chunk_size) {
                spec.depends_on.retain(|dep| !earlier.contains(dep));
                spec.conditional_on.retain(|dep| !earlier.contains(dep));
                builder.add_operation(spec)?;
            }
            let batch = builder.build(user_id, tenant_id)?;
            let ids: Vec<String> = batch.operations.iter().map(|op| op.id.clone()).collect();

            debug!(chunk = responses.len() + 1, size = ids.len(), "Executing chunk");
            responses.push(self.execute(batch, auth_token).await?);
            earlier.extend(ids);
        }

        Ok(responses)
    }
}
