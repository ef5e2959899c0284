//! Shape of a resource as held by the local resource store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A locally replicated resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: String,
    pub payload: serde_json::Value,
    /// Version tag the payload was observed at
    pub etag: Option<String>,
    /// Remote modification time of the payload
    pub modified_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            etag: None,
            modified_at: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }
}
