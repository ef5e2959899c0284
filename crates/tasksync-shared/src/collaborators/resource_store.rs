//! # Resource Store
//!
//! Local replica the delta sync engine applies remote changes to. Resources
//! are addressed by `(kind, id)` where `kind` is the scope's resource type.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::TaskSyncResult;
use crate::models::LocalRecord;

/// Local resource persistence
#[async_trait]
pub trait ResourceStore: Send + Sync + std::fmt::Debug {
    async fn get_resource(&self, kind: &str, id: &str) -> TaskSyncResult<Option<LocalRecord>>;

    /// Insert or replace a resource
    async fn upsert_resource(&self, kind: &str, record: LocalRecord) -> TaskSyncResult<()>;

    /// Remove a resource. Returns whether it existed.
    async fn delete_resource(&self, kind: &str, id: &str) -> TaskSyncResult<bool>;
}

/// In-process resource store
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    records: RwLock<HashMap<(String, String), LocalRecord>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of a kind
    pub async fn count(&self, kind: &str) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(k, _)| k == kind)
            .count()
    }

    /// Snapshot of every record of a kind, ordered by id
    pub async fn list(&self, kind: &str) -> Vec<LocalRecord> {
        let mut records: Vec<LocalRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_resource(&self, kind: &str, id: &str) -> TaskSyncResult<Option<LocalRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(kind.to_string(), id.to_string()))
            .cloned())
    }

    async fn upsert_resource(&self, kind: &str, record: LocalRecord) -> TaskSyncResult<()> {
        self.records
            .write()
            .await
            .insert((kind.to_string(), record.id.clone()), record);
        Ok(())
    }

    async fn delete_resource(&self, kind: &str, id: &str) -> TaskSyncResult<bool> {
        Ok(self
            .records
            .write()
            .await
            .remove(&(kind.to_string(), id.to_string()))
            .is_some())
    }
}
