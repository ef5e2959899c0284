//! Logical operations carried inside a batch.

use std::collections::HashMap;
use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasksync_shared::collaborators::HttpMethod;
use tasksync_shared::TaskSyncError;

/// Scheduling priority when none is given. Lower runs sooner.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Lifecycle of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Success,
    Error,
    Skipped,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Edge to a predecessor operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub id: String,
    /// The dependent is only meaningful if the predecessor succeeds
    pub conditional: bool,
}

/// Caller-facing description of an operation to add to a batch.
///
/// ```
/// use tasksync_engine::batch::OperationSpec;
/// use tasksync_shared::collaborators::HttpMethod;
///
/// let spec = OperationSpec::builder()
///     .method(HttpMethod::Post)
///     .path("/me/todo/lists")
///     .id("create-list")
///     .body(serde_json::json!({"displayName": "Groceries"}))
///     .build();
/// assert_eq!(spec.priority, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct OperationSpec {
    pub method: HttpMethod,
    #[builder(into)]
    pub path: String,
    pub body: Option<Value>,
    #[builder(default)]
    pub headers: HashMap<String, String>,
    /// Generated when absent
    #[builder(into)]
    pub id: Option<String>,
    #[builder(default)]
    pub depends_on: Vec<String>,
    /// Dependencies that must succeed for this operation to count
    #[builder(default)]
    pub conditional_on: Vec<String>,
    #[builder(default = DEFAULT_PRIORITY)]
    pub priority: u32,
}

/// One operation inside a built batch
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: String,
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
    pub dependencies: Vec<Dependency>,
    pub priority: u32,
    /// Submission index within the batch
    pub sequence: usize,
    pub status: OperationStatus,
    /// HTTP status of the nested response
    pub response_status: Option<u16>,
    pub response: Option<Value>,
    pub error: Option<TaskSyncError>,
}

impl Operation {
    pub(crate) fn from_spec(id: String, path: String, spec: OperationSpec, sequence: usize) -> Self {
        let mut dependencies: Vec<Dependency> = Vec::new();
        for dep in spec.depends_on {
            if !dependencies.iter().any(|d| d.id == dep) {
                dependencies.push(Dependency {
                    id: dep,
                    conditional: false,
                });
            }
        }
        for dep in spec.conditional_on {
            match dependencies.iter_mut().find(|d| d.id == dep) {
                Some(existing) => existing.conditional = true,
                None => dependencies.push(Dependency {
                    id: dep,
                    conditional: true,
                }),
            }
        }

        Self {
            id,
            method: spec.method,
            path,
            body: spec.body,
            headers: spec.headers,
            dependencies,
            priority: spec.priority,
            sequence,
            status: OperationStatus::Pending,
            response_status: None,
            response: None,
            error: None,
        }
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.id.as_str())
    }

    pub fn conditional_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.conditional)
            .map(|d| d.id.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    pub(crate) fn mark_success(&mut self, status: u16, payload: Option<Value>) {
        self.status = OperationStatus::Success;
        self.response_status = Some(status);
        self.response = payload;
        self.error = None;
    }

    pub(crate) fn mark_error(&mut self, status: Option<u16>, error: TaskSyncError) {
        self.status = OperationStatus::Error;
        self.response_status = status;
        self.error = Some(error);
    }

    pub(crate) fn mark_skipped(&mut self, reason: String) {
        self.status = OperationStatus::Skipped;
        self.error = Some(TaskSyncError::Validation(reason));
    }
}
