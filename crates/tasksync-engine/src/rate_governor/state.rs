//! Per-key admission state.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tasksync_shared::resilience::{CircuitBreakerMetrics, CircuitState};
use tokio::time::Instant;

use super::headers::QuotaHeaders;
use super::key::RateLimitKey;

/// Quota headroom observed on one response
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuotaSnapshot {
    pub limit: Option<u64>,
    pub remaining: u64,
    pub reset_at: Instant,
}

impl QuotaSnapshot {
    pub fn observed(quota: QuotaHeaders, now: Instant) -> Self {
        Self {
            limit: quota.limit,
            remaining: quota.remaining,
            reset_at: now + quota.reset_in,
        }
    }
}

/// Mutable counters for one rate-limit key. Only the governor touches this.
#[derive(Debug, Default)]
pub(crate) struct RateLimitState {
    pub total_requests: u64,
    pub total_throttles: u64,
    pub consecutive_throttles: u32,
    /// No call may be admitted before this instant
    pub not_before: Option<Instant>,
    /// Admitted-call timestamps, oldest first
    pub call_history: VecDeque<Instant>,
    /// Recent outcomes (`true` = success), oldest first
    pub outcomes: VecDeque<bool>,
    pub quota_window: VecDeque<QuotaSnapshot>,
}

impl RateLimitState {
    pub fn record_admission(&mut self, now: Instant, history_size: usize) {
        push_bounded(&mut self.call_history, now, history_size);
    }

    pub fn record_outcome(&mut self, success: bool, history_size: usize) {
        self.total_requests += 1;
        push_bounded(&mut self.outcomes, success, history_size);
    }

    pub fn record_quota(&mut self, snapshot: QuotaSnapshot, window: usize) {
        push_bounded(&mut self.quota_window, snapshot, window);
    }

    /// Fraction of recent calls that succeeded; 1.0 with no history
    pub fn success_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        successes as f64 / self.outcomes.len() as f64
    }

    /// Remaining time of an explicit throttle
    pub fn throttled_for(&self, now: Instant) -> Option<Duration> {
        self.not_before
            .filter(|at| *at > now)
            .map(|at| at - now)
    }

    /// Time until an exhausted quota window resets
    pub fn quota_exhausted_for(&self, now: Instant) -> Option<Duration> {
        self.quota_window
            .back()
            .filter(|q| q.remaining == 0 && q.reset_at > now)
            .map(|q| q.reset_at - now)
    }

    /// Unelapsed part of the cadence-derived spacing, if the recent call
    /// rate is high enough to warrant one.
    pub fn predictive_delay(
        &self,
        now: Instant,
        window: Duration,
        min_calls: usize,
        max_delay: Duration,
    ) -> Option<Duration> {
        let recent: Vec<Instant> = self
            .call_history
            .iter()
            .copied()
            .filter(|t| now.saturating_duration_since(*t) <= window)
            .collect();
        if recent.len() < min_calls.max(1) {
            return None;
        }

        let (first, last) = (*recent.first()?, *recent.last()?);
        let span = last.saturating_duration_since(first).max(Duration::from_secs(1));
        // 2 / (count / span)
        let suggested = span.mul_f64(2.0 / recent.len() as f64).min(max_delay);
        let since_last = now.saturating_duration_since(last);

        (since_last < suggested).then(|| suggested - since_last)
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, bound: usize) {
    queue.push_back(value);
    while queue.len() > bound.max(1) {
        queue.pop_front();
    }
}

/// Read-only snapshot of a key's governor state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorStats {
    pub key: RateLimitKey,
    pub total_requests: u64,
    pub total_throttles: u64,
    pub consecutive_throttles: u32,
    pub success_ratio: f64,
    /// Remaining explicit throttle, zero when not throttled
    pub throttled_for: Duration,
    pub recent_calls: usize,
    pub quota_limit: Option<u64>,
    pub quota_remaining: Option<u64>,
    pub circuit_state: CircuitState,
    /// Time since the breaker last recorded a failure
    pub since_last_failure: Option<Duration>,
    /// Wait before the breaker admits another call
    pub circuit_retry_in: Duration,
    pub circuit_metrics: CircuitBreakerMetrics,
}
