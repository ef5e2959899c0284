//! Delta synchronization against the mock remote.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tasksync_core::engine::delta_sync::SyncStatus;
use tasksync_core::shared::collaborators::{FileTokenStore, ResourceStore, TokenStore};
use tasksync_core::shared::models::{LocalRecord, SyncScope};

use crate::common::{
    context_with_resources, system, system_with_tokens, test_config, RejectingStore,
};

fn tasks(user: &str) -> SyncScope {
    SyncScope::new("tasks", user)
}

fn task(id: &str, title: &str, etag: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "@odata.etag": etag,
        "lastModifiedDateTime": "2024-03-01T10:00:00Z"
    })
}

#[tokio::test]
async fn test_initial_then_incremental_sync() {
    let sys = system(test_config());
    sys.remote.upsert("/tasks", task("1", "write report", "e1"));
    sys.remote.upsert("/tasks", task("2", "buy milk", "e1"));
    let engine = &sys.context.delta;

    let first = engine.sync(&tasks("alice"), false).await.unwrap();
    assert_eq!(first.changes_applied, 2);
    assert_eq!(sys.resources.count("tasks").await, 2);
    let token = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(token.token, "v2");

    sys.remote.upsert("/tasks", task("1", "write final report", "e2"));
    sys.remote.remove("/tasks", "2");
    sys.remote.upsert("/tasks", task("3", "call bob", "e1"));

    let second = engine.sync(&tasks("alice"), false).await.unwrap();
    assert_eq!(second.changes_processed, 3);
    assert_eq!(second.changes_applied, 3);
    assert!(!second.full_sync_triggered);

    let ids: Vec<String> = sys
        .resources
        .list("tasks")
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["1", "3"]);
    let updated = sys.resources.get_resource("tasks", "1").await.unwrap().unwrap();
    assert_eq!(updated.payload["title"], "write final report");

    assert_eq!(
        sys.remote.delta_requests(),
        vec![
            "https://remote.test/v1/tasks/delta".to_string(),
            "https://remote.test/v1/tasks/delta?$deltatoken=v2".to_string(),
        ]
    );
    assert_eq!(engine.scope_status(&tasks("alice")), SyncStatus::Completed);
}

#[tokio::test]
async fn test_replaying_the_feed_is_idempotent() {
    let sys = system(test_config());
    sys.remote.upsert("/tasks", task("1", "a", "e1"));
    let engine = &sys.context.delta;

    engine.sync(&tasks("alice"), false).await.unwrap();
    let before = sys.resources.list("tasks").await;

    let replay = engine.sync(&tasks("alice"), true).await.unwrap();
    assert!(replay.full_sync_triggered);
    assert_eq!(replay.changes_applied, 0);
    assert_eq!(replay.changes_skipped, 1);
    assert_eq!(sys.resources.list("tasks").await, before);
}

#[tokio::test]
async fn test_revoked_token_falls_back_to_full_sync() {
    let sys = system(test_config());
    sys.remote.upsert("/tasks", task("1", "a", "e1"));
    let engine = &sys.context.delta;
    engine.sync(&tasks("alice"), false).await.unwrap();

    sys.remote.upsert("/tasks", task("2", "b", "e1"));
    sys.remote.revoke_token("v1");

    let metrics = engine.sync(&tasks("alice"), false).await.unwrap();

    assert!(metrics.full_sync_triggered);
    assert_eq!(metrics.status, SyncStatus::Completed);
    assert_eq!(sys.resources.count("tasks").await, 2);
    let token = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(token.token, "v2");
    assert_eq!(engine.consecutive_errors(&tasks("alice")), 0);
}

#[tokio::test]
async fn test_paged_feed_is_fully_consumed() {
    let sys = system(test_config());
    sys.remote.set_page_size(2);
    for n in 0..5 {
        sys.remote
            .upsert("/tasks", task(&n.to_string(), "t", "e1"));
    }

    let metrics = sys.context.delta.sync(&tasks("alice"), false).await.unwrap();

    assert_eq!(metrics.pages_fetched, 3);
    assert_eq!(metrics.changes_applied, 5);
    assert!(!metrics.has_more);
    assert_eq!(sys.resources.count("tasks").await, 5);
}

#[tokio::test]
async fn test_page_cap_resumes_where_previous_run_stopped() {
    let mut config = test_config();
    config.delta.max_pages = 2;
    let sys = system(config);
    sys.remote.set_page_size(2);
    for n in 0..5 {
        sys.remote
            .upsert("/tasks", task(&n.to_string(), "t", "e1"));
    }
    let engine = &sys.context.delta;

    let first = engine.sync(&tasks("alice"), false).await.unwrap();

    assert!(first.has_more);
    assert_eq!(first.changes_applied, 4);
    let cursor = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(cursor.token, "https://remote.test/v1/tasks/delta?$skiptoken=all.4");

    let second = engine.sync(&tasks("alice"), false).await.unwrap();

    assert!(!second.has_more);
    assert_eq!(second.changes_applied, 1);
    assert_eq!(second.pages_fetched, 1);
    assert_eq!(sys.resources.count("tasks").await, 5);
    assert_eq!(
        sys.remote.delta_requests().last().unwrap(),
        "https://remote.test/v1/tasks/delta?$skiptoken=all.4"
    );
    let token = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(token.token, "v5");
}

#[tokio::test]
async fn test_backlog_drains_one_page_per_run() {
    let mut config = test_config();
    config.delta.max_pages = 1;
    let sys = system(config);
    sys.remote.set_page_size(1);
    sys.remote.upsert("/tasks", task("0", "t", "e1"));
    let engine = &sys.context.delta;
    engine.sync(&tasks("alice"), false).await.unwrap();

    for n in 1..=3 {
        sys.remote
            .upsert("/tasks", task(&n.to_string(), "t", "e1"));
    }
    let mut applied = Vec::new();
    for _ in 0..3 {
        applied.push(engine.sync(&tasks("alice"), false).await.unwrap().changes_applied);
    }

    assert_eq!(applied, vec![1, 1, 1]);
    assert_eq!(sys.resources.count("tasks").await, 4);
    let token = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(token.token, "v4");
}

#[tokio::test]
async fn test_store_failure_on_one_item_keeps_the_rest() {
    let store = RejectingStore::new("2");
    let (context, remote, tokens) = context_with_resources(test_config(), store.clone());
    for n in 1..=3 {
        remote.upsert("/tasks", task(&n.to_string(), "t", "e1"));
    }

    let metrics = context.delta.sync(&tasks("alice"), false).await.unwrap();

    assert_eq!(metrics.status, SyncStatus::Completed);
    assert_eq!(metrics.changes_applied, 2);
    assert_eq!(metrics.changes_errored, 1);
    assert_eq!(store.inner.count("tasks").await, 2);
    assert!(store.inner.get_resource("tasks", "2").await.unwrap().is_none());
    assert_eq!(tokens.get(&tasks("alice")).await.unwrap().unwrap().token, "v3");
    assert_eq!(context.delta.consecutive_errors(&tasks("alice")), 0);
}

#[tokio::test]
async fn test_newer_local_edit_survives_sync() {
    let sys = system(test_config());
    let local_edit = LocalRecord::new("1", json!({"id": "1", "title": "edited offline"}))
        .with_etag("local")
        .with_modified_at(Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap());
    sys.resources
        .upsert_resource("tasks", local_edit.clone())
        .await
        .unwrap();
    sys.remote.upsert("/tasks", task("1", "remote title", "e1"));

    let metrics = sys.context.delta.sync(&tasks("alice"), false).await.unwrap();

    assert_eq!(metrics.conflicts_skipped, 1);
    assert_eq!(
        sys.resources.get_resource("tasks", "1").await.unwrap(),
        Some(local_edit)
    );
}

#[tokio::test]
async fn test_scopes_are_independent() {
    let sys = system(test_config());
    sys.remote.upsert("/tasks", task("1", "a", "e1"));
    let engine = &sys.context.delta;

    engine.sync(&tasks("alice"), false).await.unwrap();
    assert!(sys.tokens.get(&tasks("bob")).await.unwrap().is_none());

    let bob = tasks("bob").with_tenant("contoso");
    engine.sync(&bob, false).await.unwrap();
    assert!(sys.tokens.get(&bob).await.unwrap().is_some());
    assert_eq!(
        sys.remote.delta_requests().last().unwrap(),
        "https://remote.test/v1/tasks/delta"
    );
}

#[tokio::test]
async fn test_file_token_store_resumes_across_restarts() {
    let dir = tempfile::tempdir().unwrap();

    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::open(dir.path()).await.unwrap());
    let first = system_with_tokens(test_config(), store);
    first.remote.upsert("/tasks", task("1", "a", "e1"));
    first.context.delta.sync(&tasks("alice"), false).await.unwrap();

    // A new process with a fresh remote view picks up the persisted token
    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::open(dir.path()).await.unwrap());
    let second = system_with_tokens(test_config(), store);
    second.remote.upsert("/tasks", task("1", "a", "e1"));
    second.remote.upsert("/tasks", task("2", "b", "e1"));

    let metrics = second.context.delta.sync(&tasks("alice"), false).await.unwrap();

    assert_eq!(metrics.changes_applied, 1);
    assert_eq!(
        second.remote.delta_requests(),
        vec!["https://remote.test/v1/tasks/delta?$deltatoken=v1".to_string()]
    );
}

#[tokio::test]
async fn test_corrupt_token_file_triggers_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::open(dir.path()).await.unwrap());
    let sys = system_with_tokens(test_config(), store);
    sys.remote.upsert("/tasks", task("1", "a", "e1"));
    sys.context.delta.sync(&tasks("alice"), false).await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        tokio::fs::write(entry.path(), b"{garbage").await.unwrap();
    }
    sys.remote.upsert("/tasks", task("2", "b", "e1"));

    let metrics = sys.context.delta.sync(&tasks("alice"), false).await.unwrap();

    assert!(metrics.full_sync_triggered);
    assert_eq!(metrics.status, SyncStatus::Completed);
    assert_eq!(sys.resources.count("tasks").await, 2);
    assert_eq!(
        sys.remote.delta_requests().last().unwrap(),
        "https://remote.test/v1/tasks/delta"
    );
    let token = sys.tokens.get(&tasks("alice")).await.unwrap().unwrap();
    assert_eq!(token.token, "v2");
}
