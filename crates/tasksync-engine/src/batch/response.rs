//! # Batch Responses
//!
//! Demultiplexes the combined response back onto operations and applies the
//! conditional-dependency policy. After `demultiplex` every operation has
//! exactly one terminal status.

use std::collections::HashSet;

use serde_json::Value;
use tasksync_shared::config::{ConditionalPolicy, OrderingStrategy};
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tracing::{debug, warn};

use super::operation::{Operation, OperationStatus};
use super::ordering::execution_order;
use super::request::BatchRequest;
use crate::middleware::error_message;
use crate::rate_governor::headers::throttle_hint;

const NO_RESPONSE: &str = "no response returned";

/// Result of executing one batch
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub batch: BatchRequest,
    /// HTTP status of the combined call
    pub http_status: u16,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Operation ids in the order they were sent
    pub execution_order: Vec<String>,
}

impl BatchResponse {
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.batch.operation(id)
    }

    pub fn status_of(&self, id: &str) -> Option<OperationStatus> {
        self.operation(id).map(|op| op.status)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &Operation> {
        self.with_status(OperationStatus::Success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Operation> {
        self.with_status(OperationStatus::Error)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Operation> {
        self.with_status(OperationStatus::Skipped)
    }

    fn with_status(&self, status: OperationStatus) -> impl Iterator<Item = &Operation> {
        self.batch
            .operations
            .iter()
            .filter(move |op| op.status == status)
    }

    pub fn all_succeeded(&self) -> bool {
        self.batch.operations.iter().all(Operation::is_success)
    }

    /// Operations with a conditional predecessor that did not succeed.
    ///
    /// Under the caller-enforced policy these keep whatever status the remote
    /// reported; callers must discard their effects.
    pub fn conditional_violations(&self) -> Vec<&Operation> {
        self.batch
            .operations
            .iter()
            .filter(|op| {
                op.conditional_dependencies().any(|dep| {
                    self.batch
                        .operation(dep)
                        .map_or(true, |pred| !pred.is_success())
                })
            })
            .collect()
    }
}

/// Apply the combined response body to the batch's operations
pub(crate) fn demultiplex(
    batch: &mut BatchRequest,
    body: &Value,
    policy: ConditionalPolicy,
) -> TaskSyncResult<()> {
    let responses = body
        .get("responses")
        .and_then(Value::as_array)
        .ok_or_else(|| TaskSyncError::invalid_response("responses", "missing responses array"))?;

    let mut seen: HashSet<String> = HashSet::new();
    for entry in responses {
        let Some(id) = entry.get("id").and_then(response_id) else {
            warn!(batch_id = %batch.id, "Ignoring nested response without id");
            continue;
        };
        if !seen.insert(id.clone()) {
            warn!(batch_id = %batch.id, operation_id = %id, "Ignoring duplicate nested response");
            continue;
        }
        let Some(op) = batch.operation_mut(&id) else {
            warn!(batch_id = %batch.id, operation_id = %id, "Ignoring response for unknown operation");
            continue;
        };
        apply_entry(op, entry);
    }

    for op in batch.operations.iter_mut().filter(|op| !op.status.is_terminal()) {
        warn!(batch_id = %batch.id, operation_id = %op.id, "Operation missing from batch response");
        op.mark_error(None, TaskSyncError::invalid_response("responses", NO_RESPONSE));
    }

    if policy == ConditionalPolicy::SkipDependents {
        skip_conditional_dependents(batch);
    }
    Ok(())
}

fn response_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn apply_entry(op: &mut Operation, entry: &Value) {
    let status = entry
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());
    let body = entry.get("body").filter(|b| !b.is_null()).cloned();

    let Some(status) = status else {
        op.mark_error(
            None,
            TaskSyncError::invalid_response("status", format!("operation '{}' has no status", op.id)),
        );
        return;
    };

    if (200..300).contains(&status) {
        op.mark_success(status, body);
        return;
    }

    let message = body
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| format!("HTTP {status}"));
    let headers = entry
        .get("headers")
        .and_then(|h| serde_json::from_value(h.clone()).ok())
        .unwrap_or_default();
    let retry_after = throttle_hint(&headers).unwrap_or_default();
    let error = TaskSyncError::from_status(status, message.clone(), retry_after)
        .unwrap_or(TaskSyncError::RemoteRejected { status, message });
    debug!(operation_id = %op.id, status, error = %error, "Operation failed");
    op.response = body;
    op.mark_error(Some(status), error);
}

/// Mark operations whose conditional predecessor did not succeed as skipped.
/// Walks in topological order so skips cascade.
fn skip_conditional_dependents(batch: &mut BatchRequest) {
    for index in execution_order(&batch.operations, OrderingStrategy::DependencyAware) {
        let failed_dep = batch.operations[index]
            .conditional_dependencies()
            .find(|dep| {
                batch
                    .operation(dep)
                    .map_or(true, |pred| pred.status != OperationStatus::Success)
            })
            .map(str::to_string);

        if let Some(dep) = failed_dep {
            let op = &mut batch.operations[index];
            debug!(operation_id = %op.id, predecessor = %dep, "Skipping conditional dependent");
            op.mark_skipped(format!("conditional predecessor '{dep}' did not succeed"));
        }
    }
}
