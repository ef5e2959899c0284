//! Batch scheduling against the mock remote.

use serde_json::json;
use tasksync_core::engine::batch::{OperationSpec, OperationStatus};
use tasksync_core::shared::collaborators::HttpMethod;
use tasksync_core::shared::config::ConditionalPolicy;
use tasksync_core::TaskSyncError;

use crate::common::{system, test_config};

/// A: create list, B: create task in it, C: complete the task if B succeeded
fn list_task_update() -> Vec<OperationSpec> {
    vec![
        OperationSpec::builder()
            .method(HttpMethod::Post)
            .path("/me/todo/lists")
            .id("A")
            .body(json!({"displayName": "Groceries"}))
            .build(),
        OperationSpec::builder()
            .method(HttpMethod::Post)
            .path("/me/todo/lists/L1/tasks")
            .id("B")
            .body(json!({"title": "Buy milk"}))
            .depends_on(vec!["A".to_string()])
            .build(),
        OperationSpec::builder()
            .method(HttpMethod::Patch)
            .path("/me/todo/lists/L1/tasks/T1")
            .id("C")
            .body(json!({"status": "completed"}))
            .conditional_on(vec!["B".to_string()])
            .build(),
    ]
}

#[tokio::test]
async fn test_list_task_update_scenario_succeeds() {
    let sys = system(test_config());
    let scheduler = &sys.context.scheduler;
    let mut builder = scheduler.builder();
    for spec in list_task_update() {
        builder.add_operation(spec).unwrap();
    }
    let batch = builder.build("alice", None).unwrap();

    let response = scheduler.execute_for_user(batch).await.unwrap();

    assert!(response.all_succeeded());
    assert_eq!(response.execution_order, vec!["A", "B", "C"]);
    assert_eq!(response.operation("A").unwrap().response_status, Some(201));
    assert_eq!(response.operation("C").unwrap().response_status, Some(200));
    assert!(response.conditional_violations().is_empty());

    let requests = sys.remote.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers["authorization"], "Bearer test-token");
}

#[tokio::test]
async fn test_failed_predecessor_skips_conditional_dependent() {
    let mut config = test_config();
    config.batch.conditional_policy = ConditionalPolicy::SkipDependents;
    let sys = system(config);
    sys.remote
        .fail_operation(HttpMethod::Post, "/me/todo/lists/L1/tasks", 400);

    let scheduler = &sys.context.scheduler;
    let mut builder = scheduler.builder();
    for spec in list_task_update() {
        builder.add_operation(spec).unwrap();
    }
    let response = scheduler
        .execute_for_user(builder.build("alice", None).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status_of("A"), Some(OperationStatus::Success));
    assert_eq!(response.status_of("B"), Some(OperationStatus::Error));
    assert_eq!(response.status_of("C"), Some(OperationStatus::Skipped));
    assert_eq!(response.batch.success_count, 1);
    assert_eq!(response.skipped().count(), 1);
}

#[tokio::test]
async fn test_caller_enforced_policy_keeps_remote_status() {
    let sys = system(test_config());
    sys.remote
        .fail_operation(HttpMethod::Post, "/me/todo/lists/L1/tasks", 400);

    let scheduler = &sys.context.scheduler;
    let mut builder = scheduler.builder();
    for spec in list_task_update() {
        builder.add_operation(spec).unwrap();
    }
    let response = scheduler
        .execute_for_user(builder.build("alice", None).unwrap())
        .await
        .unwrap();

    // The remote refused C as a failed dependency
    assert_eq!(response.status_of("C"), Some(OperationStatus::Error));
    assert_eq!(response.operation("C").unwrap().response_status, Some(424));
    assert_eq!(response.conditional_violations().len(), 1);
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_call() {
    let sys = system(test_config());
    let mut builder = sys.context.scheduler.builder();
    for (id, dep) in [("a", "c"), ("b", "a"), ("c", "b")] {
        builder
            .add_operation(
                OperationSpec::builder()
                    .method(HttpMethod::Get)
                    .path(format!("/me/todo/lists/{id}"))
                    .id(id)
                    .depends_on(vec![dep.to_string()])
                    .build(),
            )
            .unwrap();
    }

    let err = builder.build("alice", None).unwrap_err();
    assert!(matches!(err, TaskSyncError::Validation(ref m) if m.contains("cycle")));
    assert!(sys.remote.requests().is_empty());
}

#[tokio::test]
async fn test_large_submission_is_chunked() {
    let sys = system(test_config());
    let specs = (0..45)
        .map(|n| {
            OperationSpec::builder()
                .method(HttpMethod::Post)
                .path("/me/todo/lists/L1/tasks")
                .id(format!("t{n}"))
                .body(json!({"title": format!("task {n}")}))
                .build()
        })
        .collect();

    let responses = sys
        .context
        .scheduler
        .execute_chunked(specs, "alice", None, "test-token")
        .await
        .unwrap();

    assert_eq!(responses.len(), 3);
    let sizes: Vec<usize> = responses.iter().map(|r| r.batch.operations.len()).collect();
    assert_eq!(sizes, vec![20, 20, 5]);
    assert!(responses.iter().all(|r| r.all_succeeded()));
    assert_eq!(sys.remote.requests().len(), 3);
}
