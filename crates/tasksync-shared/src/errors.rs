//! # Error Types
//!
//! Unified error taxonomy for the synchronization layer.
//!
//! Batch-level and sync-level failures propagate to callers as `TaskSyncError`.
//! Per-operation and per-change failures never do: they are recorded on the
//! operation or counted in `SyncMetrics`. A skipped change due to conflict
//! resolution is not an error at all and only shows up as a metric.

use std::time::Duration;

use thiserror::Error;

/// Result type used throughout tasksync
pub type TaskSyncResult<T> = Result<T, TaskSyncError>;

/// Error taxonomy for batch execution and delta synchronization
#[derive(Debug, Clone, Error)]
pub enum TaskSyncError {
    /// Bad batch construction. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote service (or the rate governor) refused admission
    #[error("Throttled: {reason} (retry after {retry_after:?})")]
    Throttled {
        reason: String,
        retry_after: Duration,
    },

    /// Timeouts, connection failures and 5xx responses
    #[error("Transient transport error: {0}")]
    TransientTransport(String),

    /// Expired or invalid credential. Surfaced so the caller can refresh and resubmit.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// An individual operation or resource is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote rejected the request with a non-retryable 4xx status
    #[error("Remote rejected request: {status} - {message}")]
    RemoteRejected { status: u16, message: String },

    /// The subsystem is disabled or misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A collaborator store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Response body could not be interpreted
    #[error("Invalid response: {field} - {reason}")]
    InvalidResponse { field: String, reason: String },

    /// The remote no longer recognizes the continuation token
    #[error("Delta token invalid for {scope}: {reason}")]
    DeltaTokenInvalid { scope: String, reason: String },
}

impl TaskSyncError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an invalid response error for bodies that violate the wire format
    pub fn invalid_response(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Map an HTTP status (and extracted message) onto the taxonomy.
    ///
    /// Returns `None` for 2xx statuses.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Duration) -> Option<Self> {
        let message = message.into();
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Auth(message)),
            404 | 410 => Some(Self::NotFound(message)),
            408 => Some(Self::TransientTransport(format!("request timeout: {message}"))),
            429 => Some(Self::Throttled {
                reason: message,
                retry_after,
            }),
            500..=599 => Some(Self::TransientTransport(format!("{status}: {message}"))),
            _ => Some(Self::RemoteRejected { status, message }),
        }
    }

    /// Check if error is worth retrying with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskSyncError::Throttled { .. } | TaskSyncError::TransientTransport(_)
        )
    }
}
