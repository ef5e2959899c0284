//! # Delta Page Parsing
//!
//! Wire format of one change-feed page:
//!
//! ```json
//! {
//!   "value": [{"id": "1", ...}, {"id": "2", "@removed": {"reason": "deleted"}}],
//!   "@odata.nextLink": "https://.../tasks/delta?$skiptoken=...",
//!   "@odata.deltaLink": "https://.../tasks/delta?$deltatoken=..."
//! }
//! ```
//!
//! A page carries either a next link (more pages follow) or a delta link (the
//! terminal page, whose token resumes the feed on the next run).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasksync_shared::models::SyncScope;
use tasksync_shared::{TaskSyncError, TaskSyncResult};
use url::Url;

/// Marker property on deleted items
pub const REMOVED_MARKER: &str = "@removed";

/// Query parameter names carrying the continuation token
const TOKEN_PARAMS: [&str; 2] = ["$deltatoken", "deltatoken"];

/// One page of the remote change feed
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeltaPage {
    pub value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

impl DeltaPage {
    pub fn from_json(body: Value) -> TaskSyncResult<Self> {
        serde_json::from_value(body)
            .map_err(|e| TaskSyncError::invalid_response("value", e.to_string()))
    }
}

/// What happened to a remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single remote change, ready to apply locally
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceChange {
    pub kind: ChangeKind,
    pub resource_type: String,
    pub resource_id: String,
    pub payload: Value,
    pub etag: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

/// Turns raw page items into `ResourceChange`s for one fetch
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeParser<'a> {
    pub resource_type: &'a str,
    pub etag_field: &'a str,
    pub modified_field: &'a str,
    /// A stored token was attached to the fetch
    pub prior_token: bool,
    /// Fetching the unfiltered collection
    pub full_sync: bool,
}

impl ChangeParser<'_> {
    /// Parse one item.
    ///
    /// Returns `Ok(None)` for removal markers seen during a full sync, where
    /// there is nothing local left to delete. An item without an id is an error.
    pub fn parse(&self, item: &Value) -> TaskSyncResult<Option<ResourceChange>> {
        let resource_id = match item.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(TaskSyncError::invalid_response(
                    "id",
                    "change item has no id",
                ))
            }
        };

        let removed = item.get(REMOVED_MARKER).is_some();
        if removed && self.full_sync {
            return Ok(None);
        }

        let kind = if removed {
            ChangeKind::Deleted
        } else if self.prior_token && !self.full_sync {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };

        let etag = item
            .get(self.etag_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        let modified_at = item
            .get(self.modified_field)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc));

        Ok(Some(ResourceChange {
            kind,
            resource_type: self.resource_type.to_string(),
            resource_id,
            payload: item.clone(),
            etag,
            modified_at,
            observed_at: Utc::now(),
        }))
    }
}

/// Continuation token carried by a terminal delta link.
///
/// Falls back to the whole link when it has no token parameter, in which case
/// the link itself is replayed on the next run.
pub fn extract_token(delta_link: &str) -> String {
    let parsed = Url::parse(delta_link).or_else(|_| {
        Url::parse("http://relative.invalid/").and_then(|base| base.join(delta_link))
    });
    parsed
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(name, _)| TOKEN_PARAMS.contains(&name.as_ref()))
                .map(|(_, value)| value.into_owned())
        })
        .filter(|token| !token.is_empty())
        .unwrap_or_else(|| delta_link.to_string())
}

/// Whether a stored token is really a link to replay
fn is_link(token: &str) -> bool {
    token.starts_with("http://") || token.starts_with("https://") || token.starts_with('/')
}

/// Resolve a next/delta link against the base URL. Absolute links are used as-is.
pub fn resolve_link(base_url: &str, link: &str) -> String {
    if Url::parse(link).is_ok() {
        return link.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        link.trim_start_matches('/')
    )
}

/// URL of the first page of a fetch for `scope`
pub fn delta_url(
    base_url: &str,
    scope: &SyncScope,
    token: Option<&str>,
    page_size: Option<u32>,
) -> String {
    let collection = format!(
        "{}{}/delta",
        base_url.trim_end_matches('/'),
        scope.collection_path()
    );
    match (token, page_size) {
        (Some(token), _) if is_link(token) => resolve_link(base_url, token),
        (Some(token), _) => {
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            format!("{collection}?$deltatoken={encoded}")
        }
        (None, Some(size)) => format!("{collection}?$top={size}"),
        (None, None) => collection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser(prior_token: bool, full_sync: bool) -> ChangeParser<'static> {
        ChangeParser {
            resource_type: "tasks",
            etag_field: "@odata.etag",
            modified_field: "lastModifiedDateTime",
            prior_token,
            full_sync,
        }
    }

    #[test]
    fn test_page_parsing() {
        let page = DeltaPage::from_json(json!({
            "value": [{"id": "1"}],
            "@odata.nextLink": "https://remote/tasks/delta?$skiptoken=x"
        }))
        .unwrap();
        assert_eq!(page.value.len(), 1);
        assert!(page.next_link.is_some());
        assert!(page.delta_link.is_none());

        assert!(matches!(
            DeltaPage::from_json(json!({"items": []})),
            Err(TaskSyncError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_change_kind_depends_on_prior_token() {
        let item = json!({"id": "1", "title": "a"});
        assert_eq!(
            parser(false, false).parse(&item).unwrap().unwrap().kind,
            ChangeKind::Created
        );
        assert_eq!(
            parser(true, false).parse(&item).unwrap().unwrap().kind,
            ChangeKind::Updated
        );
        assert_eq!(
            parser(true, true).parse(&item).unwrap().unwrap().kind,
            ChangeKind::Created
        );
    }

    #[test]
    fn test_removed_items() {
        let item = json!({"id": "9", "@removed": {"reason": "deleted"}});
        let change = parser(true, false).parse(&item).unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.resource_id, "9");

        assert!(parser(false, true).parse(&item).unwrap().is_none());
    }

    #[test]
    fn test_version_fields_are_extracted() {
        let item = json!({
            "id": 42,
            "@odata.etag": "W/\"7\"",
            "lastModifiedDateTime": "2024-03-01T10:00:00Z"
        });
        let change = parser(false, false).parse(&item).unwrap().unwrap();
        assert_eq!(change.resource_id, "42");
        assert_eq!(change.etag.as_deref(), Some("W/\"7\""));
        assert_eq!(
            change.modified_at.unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );

        let unparseable = json!({"id": "1", "lastModifiedDateTime": "yesterday"});
        assert!(parser(false, false)
            .parse(&unparseable)
            .unwrap()
            .unwrap()
            .modified_at
            .is_none());
    }

    #[test]
    fn test_item_without_id_is_rejected() {
        assert!(parser(false, false).parse(&json!({"title": "x"})).is_err());
        assert!(parser(false, false).parse(&json!({"id": ""})).is_err());
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(
            extract_token("https://remote/tasks/delta?$deltatoken=abc%3D%3D"),
            "abc=="
        );
        assert_eq!(
            extract_token("https://remote/tasks/delta?deltatoken=xyz&$top=5"),
            "xyz"
        );
        assert_eq!(extract_token("/tasks/delta?$deltatoken=rel"), "rel");
        assert_eq!(
            extract_token("https://remote/tasks/delta?$skiptoken=s"),
            "https://remote/tasks/delta?$skiptoken=s"
        );
    }

    #[test]
    fn test_delta_url_variants() {
        let scope = SyncScope::new("todo/lists/{id}/tasks", "u1").with_resource_id("L1");
        assert_eq!(
            delta_url("https://remote/v1/", &scope, None, None),
            "https://remote/v1/todo/lists/L1/tasks/delta"
        );
        assert_eq!(
            delta_url("https://remote/v1", &scope, None, Some(50)),
            "https://remote/v1/todo/lists/L1/tasks/delta?$top=50"
        );
        assert_eq!(
            delta_url("https://remote/v1", &scope, Some("a b+c"), None),
            "https://remote/v1/todo/lists/L1/tasks/delta?$deltatoken=a+b%2Bc"
        );
        assert_eq!(
            delta_url("https://remote/v1", &scope, Some("https://other/feed?x=1"), None),
            "https://other/feed?x=1"
        );
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://remote/v1", "https://remote/v1/tasks/delta?p=2"),
            "https://remote/v1/tasks/delta?p=2"
        );
        assert_eq!(
            resolve_link("https://remote/v1/", "/tasks/delta?p=2"),
            "https://remote/v1/tasks/delta?p=2"
        );
    }
}
