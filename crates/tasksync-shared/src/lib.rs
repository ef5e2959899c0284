//! Shared foundation for tasksync: error taxonomy, configuration, logging,
//! resilience primitives, the data model and the collaborator interfaces the
//! engine consumes.
//!
//! # Modules
//!
//! - [`errors`]: `TaskSyncError` taxonomy and HTTP status classification
//! - [`config`]: Layered TOML + environment configuration with validation
//! - [`logging`]: `tracing` subscriber setup for binaries and tests
//! - [`resilience`]: Three-state circuit breaker and its metrics
//! - [`models`]: Delta tokens, sync scopes and local records
//! - [`collaborators`]: Auth, transport, token store and resource store capabilities

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod resilience;

pub use errors::{TaskSyncError, TaskSyncResult};
