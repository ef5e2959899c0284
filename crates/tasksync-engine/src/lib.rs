//! # tasksync engine
//!
//! The three components of the synchronization layer, all reaching the remote
//! service through one rate governor:
//!
//! - [`rate_governor`]: per-key admission control, throttle escalation,
//!   circuit breaking and retry backoff
//! - [`batch`]: dependency-ordered combined requests with per-operation results
//! - [`delta_sync`]: token-based incremental sync with full-resync fallback
//!
//! [`middleware::governed_send`] is the single path from a component to the
//! transport; [`SystemContext`] wires everything from configuration.

pub mod batch;
pub mod delta_sync;
pub mod middleware;
pub mod rate_governor;
pub mod system_context;

pub use batch::{BatchBuilder, BatchRequest, BatchResponse, BatchScheduler, OperationSpec};
pub use delta_sync::{DeltaSyncEngine, SyncMetrics, SyncStatus};
pub use rate_governor::{AdmissionDecision, AdmissionReason, RateGovernor, RateLimitKey};
pub use system_context::{Collaborators, SystemContext};
