//! # Sync Metrics
//!
//! Write-once record of one sync run. Counters are filled in while the run
//! applies changes and frozen by `finish`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasksync_shared::models::SyncScope;
use uuid::Uuid;

use super::apply::ApplyOutcome;

/// Lifecycle of a scope (and of a single run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    InProgress,
    /// The run switched to fetching the unfiltered collection
    FullSyncTriggered,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::FullSyncTriggered => "full_sync_triggered",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome counters for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMetrics {
    pub run_id: Uuid,
    pub scope: SyncScope,
    /// Items seen, including the ones that failed to parse or apply
    pub changes_processed: u64,
    pub changes_applied: u64,
    /// Unchanged, conflicting and erroring items
    pub changes_skipped: u64,
    pub changes_errored: u64,
    pub conflicts_skipped: u64,
    pub pages_fetched: u32,
    pub full_sync_triggered: bool,
    /// The page cap was hit before the feed was exhausted
    pub has_more: bool,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncMetrics {
    pub fn new(scope: SyncScope) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            scope,
            changes_processed: 0,
            changes_applied: 0,
            changes_skipped: 0,
            changes_errored: 0,
            conflicts_skipped: 0,
            pages_fetched: 0,
            full_sync_triggered: false,
            has_more: false,
            status: SyncStatus::InProgress,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: ApplyOutcome) {
        self.changes_processed += 1;
        match outcome {
            ApplyOutcome::Applied | ApplyOutcome::Deleted => self.changes_applied += 1,
            ApplyOutcome::Unchanged => self.changes_skipped += 1,
            ApplyOutcome::ConflictSkipped => {
                self.changes_skipped += 1;
                self.conflicts_skipped += 1;
            }
        }
    }

    pub(crate) fn record_item_error(&mut self) {
        self.changes_processed += 1;
        self.changes_errored += 1;
        self.changes_skipped += 1;
    }

    pub(crate) fn finish(&mut self, status: SyncStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock duration of a finished run
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}
