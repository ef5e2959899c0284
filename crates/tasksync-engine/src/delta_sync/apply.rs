//! Applying remote changes to the local resource store.

use serde::Serialize;
use tasksync_shared::collaborators::ResourceStore;
use tasksync_shared::models::LocalRecord;
use tasksync_shared::TaskSyncResult;
use tracing::debug;

use super::parse::{ChangeKind, ResourceChange};

/// Result of applying one change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The local copy was created or replaced
    Applied,
    /// The local copy was removed (or was already absent)
    Deleted,
    /// The local copy already carries the incoming version tag
    Unchanged,
    /// The local copy is strictly newer than the incoming one
    ConflictSkipped,
}

/// Apply one change.
///
/// With `conflict_resolution` enabled an upsert is skipped when the stored
/// copy was modified strictly later than the incoming payload. Changes whose
/// etag matches the stored copy are always skipped, so replaying a page is a
/// no-op.
pub async fn apply_change(
    store: &dyn ResourceStore,
    change: &ResourceChange,
    conflict_resolution: bool,
) -> TaskSyncResult<ApplyOutcome> {
    let kind = change.resource_type.as_str();
    let id = change.resource_id.as_str();

    if change.kind == ChangeKind::Deleted {
        let existed = store.delete_resource(kind, id).await?;
        debug!(kind, id, existed, "Applied remote deletion");
        return Ok(ApplyOutcome::Deleted);
    }

    if let Some(local) = store.get_resource(kind, id).await? {
        if local.etag.is_some() && local.etag == change.etag {
            return Ok(ApplyOutcome::Unchanged);
        }
        if conflict_resolution {
            if let (Some(local_at), Some(remote_at)) = (local.modified_at, change.modified_at) {
                if local_at > remote_at {
                    debug!(
                        kind,
                        id,
                        local = %local_at,
                        remote = %remote_at,
                        "Local copy is newer, skipping remote change"
                    );
                    return Ok(ApplyOutcome::ConflictSkipped);
                }
            }
        }
    }

    let record = LocalRecord {
        id: change.resource_id.clone(),
        payload: change.payload.clone(),
        etag: change.etag.clone(),
        modified_at: change.modified_at,
    };
    store.upsert_resource(kind, record).await?;
    Ok(ApplyOutcome::Applied)
}
