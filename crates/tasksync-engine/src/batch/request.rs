//! Built batches and their wire encoding.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::operation::{Operation, OperationStatus};

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    /// The combined call returned; individual operations may still have failed
    Completed,
    /// The combined call failed after all retries
    Failed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A validated batch of operations, in submission order
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub id: Uuid,
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub operations: Vec<Operation>,
    /// Indices into `operations`, computed once at build time
    pub execution_order: Vec<usize>,
    pub status: BatchStatus,
    pub success_count: usize,
    pub failure_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchRequest {
    pub(crate) fn new(
        user_id: String,
        tenant_id: Option<String>,
        operations: Vec<Operation>,
        execution_order: Vec<usize>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            tenant_id,
            operations,
            execution_order,
            status: BatchStatus::Pending,
            success_count: 0,
            failure_count: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub(crate) fn operation_mut(&mut self, id: &str) -> Option<&mut Operation> {
        self.operations.iter_mut().find(|op| op.id == id)
    }

    /// Operation ids in execution order
    pub fn ordered_ids(&self) -> Vec<String> {
        self.execution_order
            .iter()
            .filter_map(|i| self.operations.get(*i))
            .map(|op| op.id.clone())
            .collect()
    }

    pub fn skipped_count(&self) -> usize {
        self.count(OperationStatus::Skipped)
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.operations.iter().filter(|op| op.status == status).count()
    }

    /// Recompute counters from operation statuses
    pub(crate) fn tally(&mut self) {
        self.success_count = self.count(OperationStatus::Success);
        self.failure_count = self.count(OperationStatus::Error);
    }

    pub(crate) fn complete(&mut self, status: BatchStatus) {
        self.tally();
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Combined request body with operations in `order`
    pub fn to_wire(&self, order: &[usize]) -> Value {
        let requests: Vec<Value> = order
            .iter()
            .filter_map(|i| self.operations.get(*i))
            .map(|op| {
                let mut entry = Map::new();
                entry.insert("id".into(), json!(op.id));
                entry.insert("method".into(), json!(op.method.as_str()));
                entry.insert("url".into(), json!(op.path));
                if op.body.is_some() || !op.headers.is_empty() {
                    let mut headers = op.headers.clone();
                    if op.body.is_some() {
                        headers
                            .entry("Content-Type".to_string())
                            .or_insert_with(|| "application/json".to_string());
                    }
                    entry.insert("headers".into(), json!(headers));
                }
                if let Some(body) = &op.body {
                    entry.insert("body".into(), body.clone());
                }
                let deps: Vec<&str> = op.dependency_ids().collect();
                if !deps.is_empty() {
                    entry.insert("dependsOn".into(), json!(deps));
                }
                Value::Object(entry)
            })
            .collect();
        json!({ "requests": requests })
    }
}
