//! # tasksync-core
//!
//! Resilient synchronization layer between a local task store and a
//! rate-limited remote task-management API.
//!
//! This crate re-exports the workspace members:
//!
//! - [`shared`]: configuration, errors, logging, data model and the
//!   collaborator interfaces (transport, auth, token and resource stores)
//! - [`engine`]: the rate governor, batch scheduler and delta sync engine
//!
//! ```no_run
//! use tasksync_core::engine::SystemContext;
//! use tasksync_core::shared::config::ConfigManager;
//! use tasksync_core::shared::models::SyncScope;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let context = SystemContext::from_config(config).await?;
//! let metrics = context
//!     .delta
//!     .sync(&SyncScope::new("todo/lists", "alice"), false)
//!     .await?;
//! println!("applied {} changes", metrics.changes_applied);
//! # Ok(())
//! # }
//! ```

pub use tasksync_engine as engine;
pub use tasksync_shared as shared;

pub use tasksync_engine::{
    BatchScheduler, DeltaSyncEngine, RateGovernor, SyncMetrics, SystemContext,
};
pub use tasksync_shared::{TaskSyncError, TaskSyncResult};
