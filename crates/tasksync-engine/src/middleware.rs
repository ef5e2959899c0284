//! # Governed Calls
//!
//! Composes admission → send → record for one outbound request. Both the
//! batch scheduler and the delta sync engine reach the remote only through
//! `governed_send`, so every call is admitted by, and reported back to, the
//! rate governor for its key.

use std::time::Duration;

use serde_json::Value;
use tasksync_shared::collaborators::{Transport, TransportRequest, TransportResponse};
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::rate_governor::headers::throttle_hint;
use crate::rate_governor::{RateGovernor, RateLimitKey};

/// Wait until the governor admits a call for `key`.
///
/// Sleeps for each refusal's delay and re-checks. Gives up with `Throttled`
/// when the next sleep would push the total wait past `max_wait`.
pub async fn wait_for_admission(
    governor: &RateGovernor,
    key: &RateLimitKey,
    max_wait: Duration,
) -> TaskSyncResult<()> {
    let started = Instant::now();
    loop {
        let decision = governor.check_admission(key);
        if decision.allowed {
            return Ok(());
        }

        let waited = started.elapsed();
        if waited + decision.delay > max_wait {
            warn!(
                key = %key,
                reason = %decision.reason,
                waited_ms = waited.as_millis() as u64,
                "Admission wait budget exhausted"
            );
            return Err(TaskSyncError::Throttled {
                reason: format!("admission refused: {}", decision.reason),
                retry_after: decision.delay,
            });
        }

        debug!(
            key = %key,
            reason = %decision.reason,
            delay_ms = decision.delay.as_millis() as u64,
            "Waiting for admission"
        );
        tokio::time::sleep(decision.delay).await;
    }
}

/// Admit, send and record one request.
///
/// Returns the raw response for any HTTP status; callers decide what a
/// non-2xx status means for them (see `check_status`). Timeouts and transport
/// failures are recorded as failures and surface as `TransientTransport`.
pub async fn governed_send(
    governor: &RateGovernor,
    transport: &dyn Transport,
    key: &RateLimitKey,
    request: TransportRequest,
    max_wait: Duration,
) -> TaskSyncResult<TransportResponse> {
    wait_for_admission(governor, key, max_wait).await?;

    let timeout = request.timeout;
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, transport.send(request)).await;
    let latency = started.elapsed();

    match outcome {
        Ok(Ok(response)) => {
            governor.record_result_timed(
                key,
                response.is_success(),
                response.status,
                &response.headers,
                latency,
            );
            Ok(response)
        }
        Ok(Err(err)) => {
            governor.record_result_timed(key, false, 0, &Default::default(), latency);
            warn!(key = %key, error = %err, "Transport failure");
            Err(err.into())
        }
        Err(_) => {
            governor.record_result_timed(key, false, 0, &Default::default(), latency);
            warn!(key = %key, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            Err(TaskSyncError::TransientTransport(format!(
                "request timed out after {timeout:?}"
            )))
        }
    }
}

/// Map a non-2xx response onto the error taxonomy
pub fn check_status(response: TransportResponse) -> TaskSyncResult<TransportResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let body = response.json().unwrap_or(Value::Null);
    let message = error_message(&body).unwrap_or_else(|| format!("HTTP {}", response.status));
    let retry_after = throttle_hint(&response.headers).unwrap_or_default();
    match TaskSyncError::from_status(response.status, message, retry_after) {
        Some(err) => Err(err),
        None => Ok(response),
    }
}

/// Human-readable error text from a remote error body.
///
/// Looks at `message`, `error_description` and `detail`, then
/// `error.message`, then a bare string `error`.
pub fn error_message(body: &Value) -> Option<String> {
    ["message", "error_description", "detail"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .map(str::to_string)
}

/// Machine-readable error code (`error.code`, or a top-level `code`)
pub fn error_code(body: &Value) -> Option<&str> {
    body.pointer("/error/code")
        .and_then(Value::as_str)
        .or_else(|| body.get("code").and_then(Value::as_str))
}
