//! # Batch Builder
//!
//! Collects operations, validates each one as it is added, and on `build`
//! checks the dependency graph as a whole: every referenced id must exist and
//! the graph must be acyclic. A built batch carries its execution order.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tasksync_shared::collaborators::HttpMethod;
use tasksync_shared::config::OrderingStrategy;
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use tracing::debug;

use super::operation::{Operation, OperationSpec};
use super::ordering::execution_order;
use super::request::BatchRequest;

/// URI schemes (`https:`, `javascript:`), protocol-relative `//host` and
/// backslashes
static DISALLOWED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*:|//|\\)").expect("literal regex is valid")
});

/// `..` segments, raw or percent-encoded, and control characters
static DISALLOWED_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|/)(?:\.|%2e){2}(?:/|\?|#|$)|%2f(?:\.|%2e){2}|\\|[\x00-\x1f\x7f]")
        .expect("literal regex is valid")
});

/// Validate a relative operation path and normalize it to start with `/`
pub fn validate_path(path: &str) -> TaskSyncResult<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(TaskSyncError::validation("operation path is empty"));
    }
    if DISALLOWED_PREFIX.is_match(trimmed) || DISALLOWED_CONTENT.is_match(trimmed) {
        return Err(TaskSyncError::validation(format!(
            "operation path '{trimmed}' is not an allowed relative path"
        )));
    }
    Ok(if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    })
}

/// Accumulates operations for one batch
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    max_operations: usize,
    ordering: OrderingStrategy,
    operations: Vec<Operation>,
    ids: HashSet<String>,
    next_generated: usize,
}

impl BatchBuilder {
    pub fn new(max_operations: usize) -> Self {
        Self {
            max_operations,
            ordering: OrderingStrategy::default(),
            operations: Vec::new(),
            ids: HashSet::new(),
            next_generated: 1,
        }
    }

    pub fn with_ordering(mut self, ordering: OrderingStrategy) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.operations.len() >= self.max_operations
    }

    /// Add an operation, returning its id (generated when the spec has none)
    pub fn add_operation(&mut self, spec: OperationSpec) -> TaskSyncResult<String> {
        if self.is_full() {
            return Err(TaskSyncError::validation(format!(
                "batch is full ({} operations max)",
                self.max_operations
            )));
        }
        if spec.method == HttpMethod::Head {
            return Err(TaskSyncError::validation(format!(
                "method {} is not supported inside a batch",
                spec.method
            )));
        }
        let path = validate_path(&spec.path)?;

        let id = match &spec.id {
            Some(id) if id.trim().is_empty() => {
                return Err(TaskSyncError::validation("operation id is empty"));
            }
            Some(id) if self.ids.contains(id) => {
                return Err(TaskSyncError::validation(format!(
                    "duplicate operation id '{id}'"
                )));
            }
            Some(id) => id.clone(),
            None => self.generate_id(),
        };

        let sequence = self.operations.len();
        self.ids.insert(id.clone());
        self.operations
            .push(Operation::from_spec(id.clone(), path, spec, sequence));
        Ok(id)
    }

    fn generate_id(&mut self) -> String {
        loop {
            let candidate = self.next_generated.to_string();
            self.next_generated += 1;
            if !self.ids.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Validate the dependency graph and produce the batch, ordered with the
    /// builder's strategy
    pub fn build(self, user_id: &str, tenant_id: Option<&str>) -> TaskSyncResult<BatchRequest> {
        if self.operations.is_empty() {
            return Err(TaskSyncError::validation("batch has no operations"));
        }
        if user_id.trim().is_empty() {
            return Err(TaskSyncError::validation("batch owner user id is empty"));
        }

        for op in &self.operations {
            if let Some(missing) = op.dependency_ids().find(|dep| !self.ids.contains(*dep)) {
                return Err(TaskSyncError::validation(format!(
                    "operation '{}' depends on unknown operation '{missing}'",
                    op.id
                )));
            }
        }

        if let Some(cycle) = find_cycle(&self.operations) {
            return Err(TaskSyncError::validation(format!(
                "dependency cycle detected: {}",
                cycle.join(" -> ")
            )));
        }

        let order = execution_order(&self.operations, self.ordering);
        debug!(
            operations = self.operations.len(),
            ordering = ?self.ordering,
            user_id, "Built batch request"
        );
        Ok(BatchRequest::new(
            user_id.to_string(),
            tenant_id.map(str::to_string),
            self.operations,
            order,
        ))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with an explicit stack. Returns the ids along the
/// first cycle found, closed with its starting id.
fn find_cycle(operations: &[Operation]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = operations
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = operations
        .iter()
        .map(|op| {
            op.dependency_ids()
                .filter_map(|dep| index.get(dep).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; operations.len()];
    for root in 0..operations.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, next edge to explore)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::OnStack;

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if let Some(&child) = edges[node].get(next) {
                frame.1 += 1;
                match marks[child] {
                    Mark::Unvisited => {
                        marks[child] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|(n, _)| operations[*n].id.clone())
                            .collect();
                        cycle.push(operations[child].id.clone());
                        return Some(cycle);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}
