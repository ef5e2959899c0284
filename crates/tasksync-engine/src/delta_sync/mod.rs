//! # Delta Sync
//!
//! Incremental synchronization of remote collections using continuation
//! tokens, with automatic fallback to a full resync when tokens are rejected
//! or a scope keeps failing.
//!
//! - `parse`: change-feed page format, token extraction and URL building
//! - `apply`: applying one change to the local store with conflict resolution
//! - `metrics`: per-run outcome record
//! - `engine`: the `DeltaSyncEngine` orchestrating runs per scope

mod apply;
mod engine;
mod metrics;
pub mod parse;

pub use apply::{apply_change, ApplyOutcome};
pub use engine::DeltaSyncEngine;
pub use metrics::{SyncMetrics, SyncStatus};
pub use parse::{ChangeKind, DeltaPage, ResourceChange};
