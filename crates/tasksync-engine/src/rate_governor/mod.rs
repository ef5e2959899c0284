//! # Rate Governor
//!
//! Admission control for every outbound call, keyed by
//! `(endpoint pattern, tenant, user)`.
//!
//! Each key owns a `RateLimitState` and a `CircuitBreaker`. Before a call the
//! caller asks `check_admission`; afterwards it reports the outcome through
//! `record_result`. Admission is refused when:
//!
//! - the breaker is open, or half-open with its probe outstanding (`circuit_open`)
//! - the remote asked us to back off and that wait has not elapsed (`throttled`)
//! - in adaptive mode, the last quota snapshot is exhausted or the recent call
//!   cadence is high enough that the remote is likely to throttle soon
//!   (`predictive_throttle`)
//!
//! Retry delays come from per-endpoint retry profiles via `compute_backoff`.

mod backoff;
mod governor;
pub mod headers;
mod key;
mod state;

pub use governor::RateGovernor;
pub use key::{AdmissionDecision, AdmissionReason, RateLimitKey};
pub use state::GovernorStats;
