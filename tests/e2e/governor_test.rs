//! Shared rate governor behaviour across both components.

use std::time::Duration;

use serde_json::json;
use tasksync_core::engine::batch::OperationSpec;
use tasksync_core::shared::collaborators::{HttpMethod, TransportResponse};
use tasksync_core::shared::models::SyncScope;
use tasksync_core::shared::resilience::CircuitState;
use tasksync_core::TaskSyncError;
use tokio::time::Instant;

use crate::common::{system, test_config};

fn scope() -> SyncScope {
    SyncScope::new("tasks", "alice")
}

fn throttled(seconds: u64) -> TransportResponse {
    TransportResponse::new(429).with_header("Retry-After", seconds.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_throttled_fetch_waits_and_recovers() {
    let mut config = test_config();
    config.delta.fetch_attempts = 3;
    let sys = system(config);
    sys.remote.upsert("/tasks", json!({"id": "1"}));
    sys.remote.push_outage(throttled(5));

    let started = Instant::now();
    let metrics = sys.context.delta.sync(&scope(), false).await.unwrap();

    assert_eq!(metrics.changes_applied, 1);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(sys.remote.delta_requests().len(), 2);

    // The batch endpoint has its own key and was never throttled
    let batch_key = sys.context.scheduler.rate_limit_key("alice", None);
    assert!(sys.context.governor.check_admission(&batch_key).allowed);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_throttles_escalate() {
    let mut config = test_config();
    config.delta.fetch_attempts = 1;
    let sys = system(config);
    let key = sys.context.delta.rate_limit_key(&scope());

    let mut waits = Vec::new();
    for _ in 0..4 {
        sys.remote.push_outage(throttled(5));
        let err = sys.context.delta.sync(&scope(), false).await.unwrap_err();
        assert!(matches!(err, TaskSyncError::Throttled { .. }));
        waits.push(sys.context.governor.stats(&key).unwrap().throttled_for);
    }

    assert_eq!(
        waits,
        [5, 10, 20, 40].map(Duration::from_secs).to_vec()
    );
    let stats = sys.context.governor.stats(&key).unwrap();
    assert_eq!(stats.total_throttles, 4);
    assert_eq!(stats.consecutive_throttles, 4);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_blocks_only_its_key() {
    let mut config = test_config();
    config.delta.fetch_attempts = 1;
    config.delta.max_admission_wait_ms = 1_000;
    let sys = system(config);
    let key = sys.context.delta.rate_limit_key(&scope());
    let failure_threshold = sys.context.config.governor.circuit_breaker.failure_threshold;

    for _ in 0..failure_threshold {
        sys.remote.push_outage(TransportResponse::new(500));
        let err = sys.context.delta.sync(&scope(), false).await.unwrap_err();
        assert!(matches!(err, TaskSyncError::TransientTransport(_)));
    }
    assert_eq!(
        sys.context.governor.stats(&key).unwrap().circuit_state,
        CircuitState::Open
    );

    // Refused by the governor without reaching the remote
    let err = sys.context.delta.sync(&scope(), false).await.unwrap_err();
    assert!(matches!(err, TaskSyncError::Throttled { .. }));
    assert_eq!(sys.remote.requests().len(), failure_threshold as usize);

    // The batch key is unaffected
    let mut builder = sys.context.scheduler.builder();
    builder
        .add_operation(
            OperationSpec::builder()
                .method(HttpMethod::Get)
                .path("/me/todo/lists")
                .build(),
        )
        .unwrap();
    let response = sys
        .context
        .scheduler
        .execute_for_user(builder.build("alice", None).unwrap())
        .await
        .unwrap();
    assert!(response.all_succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_timeout() {
    let mut config = test_config();
    config.delta.fetch_attempts = 1;
    config.delta.max_admission_wait_ms = 1_000;
    let sys = system(config);
    let key = sys.context.delta.rate_limit_key(&scope());
    let breaker = sys.context.config.governor.circuit_breaker.clone();

    for _ in 0..breaker.failure_threshold {
        sys.remote.push_outage(TransportResponse::new(500));
        let _ = sys.context.delta.sync(&scope(), false).await;
    }

    tokio::time::advance(Duration::from_secs(breaker.timeout_seconds + 1)).await;

    sys.context.delta.sync(&scope(), false).await.unwrap();
    assert_eq!(
        sys.context.governor.stats(&key).unwrap().circuit_state,
        CircuitState::HalfOpen
    );

    for _ in 1..breaker.success_threshold {
        sys.context.delta.sync(&scope(), false).await.unwrap();
    }
    assert_eq!(
        sys.context.governor.stats(&key).unwrap().circuit_state,
        CircuitState::Closed
    );
    assert_eq!(sys.context.delta.consecutive_errors(&scope()), 0);
}
