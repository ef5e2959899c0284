//! # Execution Ordering
//!
//! Orders a validated (acyclic) batch for the wire. All strategies except
//! `Submission` produce a topological order; the level-based strategies only
//! reorder operations within one topological level, so a dependency always
//! precedes its dependents.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tasksync_shared::config::OrderingStrategy;

use super::operation::Operation;

/// Indices into `operations` in execution order
pub fn execution_order(operations: &[Operation], strategy: OrderingStrategy) -> Vec<usize> {
    match strategy {
        OrderingStrategy::Submission => (0..operations.len()).collect(),
        OrderingStrategy::DependencyAware => kahn(operations),
        OrderingStrategy::PriorityAware => levels(operations)
            .into_iter()
            .flat_map(|mut level| {
                level.sort_by_key(|i| (operations[*i].priority, *i));
                level
            })
            .collect(),
        OrderingStrategy::Performance => levels(operations)
            .into_iter()
            .flat_map(|level| interleave(operations, level))
            .collect(),
    }
}

fn dependency_indices(operations: &[Operation]) -> Vec<Vec<usize>> {
    let index: HashMap<&str, usize> = operations
        .iter()
        .enumerate()
        .map(|(i, op)| (op.id.as_str(), i))
        .collect();
    operations
        .iter()
        .map(|op| {
            let mut deps: Vec<usize> = op
                .dependency_ids()
                .filter_map(|d| index.get(d).copied())
                .collect();
            deps.dedup();
            deps
        })
        .collect()
}

/// Kahn's algorithm; among ready operations the earliest submitted goes first
fn kahn(operations: &[Operation]) -> Vec<usize> {
    let deps = dependency_indices(operations);
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); operations.len()];
    for (op, op_deps) in deps.iter().enumerate() {
        for &dep in op_deps {
            dependents[dep].push(op);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(operations.len());
    while let Some(Reverse(next)) = ready.pop() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    // Unreachable for a validated batch; keep every operation regardless
    if order.len() < operations.len() {
        let placed: Vec<bool> = (0..operations.len()).map(|i| order.contains(&i)).collect();
        order.extend((0..operations.len()).filter(|i| !placed[*i]));
    }
    order
}

/// Group operations by longest-path depth from the roots, each group in
/// submission order
fn levels(operations: &[Operation]) -> Vec<Vec<usize>> {
    let deps = dependency_indices(operations);
    let mut depth = vec![0usize; operations.len()];
    for op in kahn(operations) {
        depth[op] = deps[op]
            .iter()
            .map(|dep| depth[*dep] + 1)
            .max()
            .unwrap_or(0);
    }

    let max_depth = depth.iter().copied().max().unwrap_or(0);
    let mut grouped: Vec<Vec<usize>> = vec![Vec::new(); max_depth + 1];
    for (op, d) in depth.into_iter().enumerate() {
        grouped[d].push(op);
    }
    grouped.retain(|level| !level.is_empty());
    grouped
}

/// Round-robin reads, writes and everything else
fn interleave(operations: &[Operation], level: Vec<usize>) -> Vec<usize> {
    let (reads, rest): (Vec<usize>, Vec<usize>) = level
        .into_iter()
        .partition(|i| operations[*i].method.is_read());
    let (writes, others): (Vec<usize>, Vec<usize>) = rest
        .into_iter()
        .partition(|i| operations[*i].method.is_write());

    let mut queues = [reads.into_iter(), writes.into_iter(), others.into_iter()];
    let mut order = Vec::new();
    loop {
        let before = order.len();
        for queue in &mut queues {
            if let Some(i) = queue.next() {
                order.push(i);
            }
        }
        if order.len() == before {
            return order;
        }
    }
}
