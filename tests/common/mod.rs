//! Helper functions for end-to-end tests
//!
//! `MockRemote` is an in-process stand-in for the remote task API. It keeps a
//! change log per collection and serves it through the same wire formats the
//! real service uses:
//!
//! - `POST {base}/$batch` answers every nested request, failing dependents of
//!   failed requests with 424
//! - `GET {base}/{collection}/delta` serves a snapshot (no token) or the
//!   changes since a `$deltatoken`, paged with `$skiptoken`
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tasksync_core::engine::{Collaborators, SystemContext};
use tasksync_core::shared::collaborators::{
    HttpMethod, InMemoryResourceStore, InMemoryTokenStore, ResourceStore, StaticAuthProvider,
    TokenStore, Transport, TransportError, TransportRequest, TransportResponse,
};
use tasksync_core::shared::config::TaskSyncConfig;
use tasksync_core::shared::models::LocalRecord;
use tasksync_core::shared::{TaskSyncError, TaskSyncResult};

pub const BASE_URL: &str = "https://remote.test/v1";

#[derive(Debug, Default)]
struct RemoteState {
    /// Change log per collection path, oldest first
    feeds: HashMap<String, Vec<Value>>,
    revoked_tokens: HashSet<String>,
    /// Items per delta page; 0 means unpaged
    page_size: usize,
    /// Status overrides for nested batch requests, keyed by `"METHOD url"`
    operation_statuses: HashMap<String, u16>,
    /// Responses returned ahead of normal handling
    outages: VecDeque<TransportResponse>,
    requests: Vec<TransportRequest>,
}

/// Stateful in-process remote service
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<RemoteState>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    /// Create or modify an item in a collection (e.g. `"/tasks"`)
    pub fn upsert(&self, collection: &str, item: Value) {
        self.state()
            .feeds
            .entry(collection.to_string())
            .or_default()
            .push(item);
    }

    pub fn remove(&self, collection: &str, id: &str) {
        self.upsert(
            collection,
            json!({"id": id, "@removed": {"reason": "deleted"}}),
        );
    }

    /// Make the remote reject a previously issued delta token
    pub fn revoke_token(&self, token: &str) {
        self.state().revoked_tokens.insert(token.to_string());
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = size;
    }

    pub fn fail_operation(&self, method: HttpMethod, url: &str, status: u16) {
        self.state()
            .operation_statuses
            .insert(format!("{method} {url}"), status);
    }

    pub fn push_outage(&self, response: TransportResponse) {
        self.state().outages.push_back(response);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state().requests.clone()
    }

    pub fn delta_requests(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Get)
            .map(|r| r.url)
            .collect()
    }

    fn handle_batch(&self, request: &TransportRequest) -> TransportResponse {
        let state = self.state();
        let empty = Vec::new();
        let nested = request
            .body
            .as_ref()
            .and_then(|b| b["requests"].as_array())
            .unwrap_or(&empty);

        let mut failed: HashSet<String> = HashSet::new();
        let mut responses = Vec::new();
        for entry in nested {
            let id = entry["id"].as_str().unwrap_or_default().to_string();
            let method = entry["method"].as_str().unwrap_or_default();
            let url = entry["url"].as_str().unwrap_or_default();
            let blocked = entry["dependsOn"]
                .as_array()
                .is_some_and(|deps| deps.iter().any(|d| failed.contains(d.as_str().unwrap_or_default())));

            let status = if blocked {
                424
            } else if let Some(status) = state.operation_statuses.get(&format!("{method} {url}")) {
                *status
            } else if method == "POST" {
                201
            } else {
                200
            };
            if !(200..300).contains(&status) {
                failed.insert(id.clone());
            }
            let body = if (200..300).contains(&status) {
                json!({"id": format!("{id}-remote"), "url": url})
            } else {
                json!({"error": {"code": "failed", "message": format!("{method} {url} failed")}})
            };
            responses.push(json!({"id": id, "status": status, "headers": {}, "body": body}));
        }

        TransportResponse::new(200).with_json(&json!({ "responses": responses }))
    }

    fn handle_delta(&self, url: &str) -> TransportResponse {
        let state = self.state();
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let collection = path
            .trim_start_matches(BASE_URL)
            .trim_end_matches("/delta")
            .to_string();
        let params: HashMap<&str, &str> = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let log = state.feeds.get(&collection).cloned().unwrap_or_default();
        let version = log.len();

        // Skip tokens carry "<since>.<offset>", with "all" for snapshots
        let (since, offset) = match (params.get("$deltatoken"), params.get("$skiptoken")) {
            (Some(token), _) => {
                if state.revoked_tokens.contains(*token) {
                    return TransportResponse::new(410).with_json(&json!({
                        "error": {"code": "resyncRequired", "message": "token expired"}
                    }));
                }
                (token.trim_start_matches('v').parse::<usize>().ok(), 0)
            }
            (None, Some(skip)) => {
                let (since, offset) = skip.split_once('.').unwrap_or(("all", "0"));
                (since.parse().ok(), offset.parse().unwrap_or(0))
            }
            (None, None) => (None, 0),
        };

        let items: Vec<Value> = match since {
            Some(since) => log.get(since..).map(<[Value]>::to_vec).unwrap_or_default(),
            None => snapshot(&log),
        };

        let page_size = if state.page_size == 0 {
            items.len().max(1)
        } else {
            state.page_size
        };
        let end = (offset + page_size).min(items.len());
        let page: Vec<Value> = items[offset.min(end)..end].to_vec();

        let feed_url = format!("{BASE_URL}{collection}/delta");
        let body = if end < items.len() {
            let since = since.map_or("all".to_string(), |s| s.to_string());
            json!({"value": page, "@odata.nextLink": format!("{feed_url}?$skiptoken={since}.{end}")})
        } else {
            json!({"value": page, "@odata.deltaLink": format!("{feed_url}?$deltatoken=v{version}")})
        };
        TransportResponse::new(200).with_json(&body)
    }
}

/// Current state of a collection, in first-creation order
fn snapshot(log: &[Value]) -> Vec<Value> {
    let mut current: Vec<Value> = Vec::new();
    for entry in log {
        let id = &entry["id"];
        let existing = current.iter().position(|item| &item["id"] == id);
        match (entry.get("@removed").is_some(), existing) {
            (true, Some(index)) => {
                current.remove(index);
            }
            (true, None) => {}
            (false, Some(index)) => current[index] = entry.clone(),
            (false, None) => current.push(entry.clone()),
        }
    }
    current
}

#[async_trait]
impl Transport for MockRemote {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let outage = {
            let mut state = self.state();
            state.requests.push(request.clone());
            state.outages.pop_front()
        };
        if let Some(response) = outage {
            return Ok(response);
        }

        match request.method {
            HttpMethod::Post if request.url.ends_with("/$batch") => Ok(self.handle_batch(&request)),
            HttpMethod::Get if request.url.contains("/delta") => Ok(self.handle_delta(&request.url)),
            _ => Ok(TransportResponse::new(404)),
        }
    }
}

/// Everything an end-to-end test needs
pub struct TestSystem {
    pub context: SystemContext,
    pub remote: Arc<MockRemote>,
    pub tokens: Arc<dyn TokenStore>,
    pub resources: Arc<InMemoryResourceStore>,
}

/// Default configuration pointed at the mock remote
pub fn test_config() -> TaskSyncConfig {
    let mut config = TaskSyncConfig::default();
    config.remote.base_url = BASE_URL.to_string();
    config
}

pub fn system(config: TaskSyncConfig) -> TestSystem {
    system_with_tokens(config, Arc::new(InMemoryTokenStore::new()))
}

pub fn system_with_tokens(config: TaskSyncConfig, tokens: Arc<dyn TokenStore>) -> TestSystem {
    let remote = MockRemote::new();
    let resources = Arc::new(InMemoryResourceStore::new());
    let context = SystemContext::with_collaborators(
        config,
        Collaborators {
            transport: remote.clone(),
            auth: Arc::new(StaticAuthProvider::shared("test-token")),
            tokens: tokens.clone(),
            resources: resources.clone() as Arc<dyn ResourceStore>,
        },
    );
    TestSystem {
        context,
        remote,
        tokens,
        resources,
    }
}

/// Resource store that fails every write of one id
#[derive(Debug)]
pub struct RejectingStore {
    pub inner: InMemoryResourceStore,
    reject: String,
}

impl RejectingStore {
    pub fn new(reject: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryResourceStore::new(),
            reject: reject.into(),
        })
    }
}

#[async_trait]
impl ResourceStore for RejectingStore {
    async fn get_resource(&self, kind: &str, id: &str) -> TaskSyncResult<Option<LocalRecord>> {
        self.inner.get_resource(kind, id).await
    }

    async fn upsert_resource(&self, kind: &str, record: LocalRecord) -> TaskSyncResult<()> {
        if record.id == self.reject {
            return Err(TaskSyncError::storage(format!("write of {} refused", record.id)));
        }
        self.inner.upsert_resource(kind, record).await
    }

    async fn delete_resource(&self, kind: &str, id: &str) -> TaskSyncResult<bool> {
        self.inner.delete_resource(kind, id).await
    }
}

/// Context wired to the mock remote and a caller-supplied resource store
pub fn context_with_resources(
    config: TaskSyncConfig,
    resources: Arc<dyn ResourceStore>,
) -> (SystemContext, Arc<MockRemote>, Arc<dyn TokenStore>) {
    let remote = MockRemote::new();
    let tokens: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let context = SystemContext::with_collaborators(
        config,
        Collaborators {
            transport: remote.clone(),
            auth: Arc::new(StaticAuthProvider::shared("test-token")),
            tokens: tokens.clone(),
            resources,
        },
    );
    (context, remote, tokens)
}
