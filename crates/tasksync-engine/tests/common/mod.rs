//! Shared test helpers for tasksync-engine integration tests.
//!
//! Provides a scripted transport that replays canned responses and records
//! every request it receives, plus builders for combined batch replies.

#![expect(
    dead_code,
    reason = "Test utilities shared across integration test modules"
)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tasksync_engine::RateGovernor;
use tasksync_shared::collaborators::{
    Transport, TransportError, TransportRequest, TransportResponse,
};
use tasksync_shared::config::GovernorConfig;

pub const BASE_URL: &str = "https://remote.test/v1";

/// Transport replaying scripted outcomes in order
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: TransportResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn fail(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Operation ids of the n-th combined request, in wire order
    pub fn wire_ids(&self, n: usize) -> Vec<String> {
        let requests = self.requests();
        let body = requests[n].body.as_ref().expect("batch request has a body");
        body["requests"]
            .as_array()
            .expect("requests array")
            .iter()
            .map(|entry| entry["id"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".to_string())))
    }
}

/// Combined reply with one nested response per `(id, status, body)`
pub fn batch_reply(entries: &[(&str, u16, Value)]) -> TransportResponse {
    let responses: Vec<Value> = entries
        .iter()
        .map(|(id, status, body)| {
            json!({"id": id, "status": status, "headers": {}, "body": body})
        })
        .collect();
    TransportResponse::new(200).with_json(&json!({ "responses": responses }))
}

/// Governor with default settings
pub fn governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(GovernorConfig::default()))
}

/// Governor that admits everything
pub fn open_governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(GovernorConfig {
        enabled: false,
        ..GovernorConfig::default()
    }))
}
