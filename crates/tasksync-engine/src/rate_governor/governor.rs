//! The rate governor itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tasksync_shared::config::{GovernorConfig, GovernorMode, RetryProfileConfig};
use tasksync_shared::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::{base_backoff, sample_jitter, with_jitter};
use super::headers::{quota_headers, throttle_hint};
use super::key::{AdmissionDecision, AdmissionReason, RateLimitKey};
use super::state::{GovernorStats, QuotaSnapshot, RateLimitState};

/// Floor for refusal delays so callers polling admission never spin
const MIN_REFUSAL_DELAY: Duration = Duration::from_millis(50);

/// Highest multiplier applied to repeated throttle waits
const MAX_THROTTLE_MULTIPLIER: u32 = 8;

#[derive(Debug)]
struct GovernedKey {
    limits: Mutex<RateLimitState>,
    breaker: CircuitBreaker,
}

impl GovernedKey {
    fn limits(&self) -> MutexGuard<'_, RateLimitState> {
        self.limits.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Per-key admission control, throttle tracking, circuit breaking and backoff.
///
/// State is created lazily the first time a key is seen. The governor never
/// fails: every method returns a decision or a value, never an error.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    breaker_config: CircuitBreakerConfig,
    keys: Mutex<HashMap<RateLimitKey, Arc<GovernedKey>>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let breaker_config = config.circuit_breaker.to_resilience_config();
        Self {
            config,
            breaker_config,
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    fn keys(&self) -> MutexGuard<'_, HashMap<RateLimitKey, Arc<GovernedKey>>> {
        self.keys.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn entry(&self, key: &RateLimitKey) -> Arc<GovernedKey> {
        let mut keys = self.keys();
        Arc::clone(keys.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating rate limit state");
            Arc::new(GovernedKey {
                limits: Mutex::new(RateLimitState::default()),
                breaker: CircuitBreaker::new(key.to_string(), self.breaker_config),
            })
        }))
    }

    fn existing(&self, key: &RateLimitKey) -> Option<Arc<GovernedKey>> {
        self.keys().get(key).cloned()
    }

    fn is_adaptive(&self) -> bool {
        self.config.mode == GovernorMode::Adaptive
    }

    /// Decide whether a call for `key` may proceed now. Never blocks.
    ///
    /// An allowed decision claims the call: it is recorded in the cadence
    /// history and, while the breaker is half-open, takes the probe slot.
    pub fn check_admission(&self, key: &RateLimitKey) -> AdmissionDecision {
        if !self.config.enabled {
            return AdmissionDecision::allow(AdmissionReason::Disabled);
        }

        let entry = self.entry(key);

        // Peek first so a refusal for another reason never consumes the probe slot
        if entry.breaker.state() != CircuitState::Closed {
            let wait = entry.breaker.retry_delay();
            if !wait.is_zero() {
                return refuse(key, AdmissionReason::CircuitOpen, wait);
            }
        }

        let now = Instant::now();
        let mut limits = entry.limits();

        if let Some(wait) = limits.throttled_for(now) {
            return refuse(key, AdmissionReason::Throttled, wait);
        }

        if self.is_adaptive() {
            if let Some(wait) = limits.quota_exhausted_for(now) {
                return refuse(key, AdmissionReason::PredictiveThrottle, wait);
            }
            if let Some(wait) = limits.predictive_delay(
                now,
                self.config.predictive_window(),
                self.config.predictive_min_calls,
                self.config.predictive_max_delay(),
            ) {
                return refuse(key, AdmissionReason::PredictiveThrottle, wait);
            }
        }

        if !entry.breaker.should_allow() {
            return refuse(key, AdmissionReason::CircuitOpen, entry.breaker.retry_delay());
        }

        limits.record_admission(now, self.config.history_size);
        AdmissionDecision::allow(AdmissionReason::WithinLimits)
    }

    /// Record the outcome of a call admitted for `key`
    pub fn record_result(
        &self,
        key: &RateLimitKey,
        success: bool,
        status: u16,
        headers: &HashMap<String, String>,
    ) {
        self.record_result_timed(key, success, status, headers, Duration::ZERO);
    }

    /// Record an outcome together with the call latency (feeds breaker metrics)
    pub fn record_result_timed(
        &self,
        key: &RateLimitKey,
        success: bool,
        status: u16,
        headers: &HashMap<String, String>,
        latency: Duration,
    ) {
        let entry = self.entry(key);
        let now = Instant::now();
        let hint = throttle_hint(headers);
        let throttled = status == 429 || (status == 503 && hint.is_some());
        let success = success && !throttled;

        {
            let mut limits = entry.limits();
            limits.record_outcome(success, self.config.history_size);

            if throttled {
                limits.total_throttles += 1;
                limits.consecutive_throttles = limits.consecutive_throttles.saturating_add(1);
                let wait = self.throttle_wait(hint, limits.consecutive_throttles);
                limits.not_before = Some(now + wait);
                warn!(
                    key = %key,
                    status,
                    consecutive = limits.consecutive_throttles,
                    wait_ms = wait.as_millis() as u64,
                    "Remote throttled request"
                );
            } else {
                limits.consecutive_throttles = 0;
            }

            if success && self.is_adaptive() {
                if let Some(quota) = quota_headers(headers) {
                    limits.record_quota(
                        QuotaSnapshot::observed(quota, now),
                        self.config.quota_window_size,
                    );
                }
            }
        }

        if success {
            entry.breaker.record_success_manual(latency);
        } else {
            entry.breaker.record_failure_manual(latency);
        }
    }

    /// Wait imposed by a throttling response: the hint (or default),
    /// multiplied by `min(2^(n-1), 8)` from the second consecutive throttle
    /// on, capped at the configured maximum.
    fn throttle_wait(&self, hint: Option<Duration>, consecutive: u32) -> Duration {
        let base = hint.unwrap_or_else(|| self.config.default_throttle_wait());
        let multiplier = if consecutive <= 1 {
            1
        } else {
            2u32.saturating_pow(consecutive - 1).min(MAX_THROTTLE_MULTIPLIER)
        };
        base.saturating_mul(multiplier)
            .min(self.config.max_throttle_wait())
    }

    /// Retry profile for an endpoint pattern: exact match, then the longest
    /// matching `*`-suffixed prefix, then the default profile.
    pub fn profile_for(&self, endpoint_pattern: &str) -> &RetryProfileConfig {
        if let Some(profile) = self.config.profiles.get(endpoint_pattern) {
            return profile;
        }
        self.config
            .profiles
            .iter()
            .filter_map(|(pattern, profile)| {
                let prefix = pattern.strip_suffix('*')?;
                endpoint_pattern
                    .starts_with(prefix)
                    .then_some((prefix.len(), profile))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, profile)| profile)
            .unwrap_or(&self.config.default_profile)
    }

    /// Delay before retry `attempt` (1-based) for an endpoint pattern.
    ///
    /// Returns `None` once the profile's retry budget is exhausted. The
    /// adaptive strategy uses the success ratio aggregated over every key
    /// sharing the pattern.
    pub fn compute_backoff(&self, endpoint_pattern: &str, attempt: u32) -> Option<Duration> {
        let ratio = self.pattern_success_ratio(endpoint_pattern);
        self.backoff_with_ratio(endpoint_pattern, attempt, ratio)
    }

    /// Like `compute_backoff`, but the adaptive strategy uses this key's own
    /// success ratio.
    pub fn compute_backoff_for_key(&self, key: &RateLimitKey, attempt: u32) -> Option<Duration> {
        let ratio = self
            .existing(key)
            .map(|entry| entry.limits().success_ratio())
            .unwrap_or(1.0);
        self.backoff_with_ratio(&key.endpoint, attempt, ratio)
    }

    fn backoff_with_ratio(&self, pattern: &str, attempt: u32, ratio: f64) -> Option<Duration> {
        let profile = self.profile_for(pattern);
        if attempt > profile.max_retries {
            return None;
        }
        let delay = base_backoff(profile, attempt, ratio);
        Some(with_jitter(delay, sample_jitter(profile), profile))
    }

    fn pattern_success_ratio(&self, endpoint_pattern: &str) -> f64 {
        let entries: Vec<Arc<GovernedKey>> = self
            .keys()
            .iter()
            .filter(|(key, _)| key.endpoint == endpoint_pattern)
            .map(|(_, entry)| Arc::clone(entry))
            .collect();

        let (successes, total) = entries.iter().fold((0usize, 0usize), |(ok, all), entry| {
            let limits = entry.limits();
            let wins = limits.outcomes.iter().filter(|o| **o).count();
            (ok + wins, all + limits.outcomes.len())
        });

        if total == 0 {
            1.0
        } else {
            successes as f64 / total as f64
        }
    }

    /// Drop all state for a key; it is recreated on next use
    pub fn reset(&self, key: &RateLimitKey) {
        if self.keys().remove(key).is_some() {
            info!(key = %key, "Rate limit state reset");
        }
    }

    pub fn reset_all(&self) {
        let mut keys = self.keys();
        let count = keys.len();
        keys.clear();
        info!(count, "All rate limit state reset");
    }

    /// Snapshot of a key's state, if the key has been seen
    pub fn stats(&self, key: &RateLimitKey) -> Option<GovernorStats> {
        let entry = self.existing(key)?;
        let now = Instant::now();
        let limits = entry.limits();
        let latest_quota = limits.quota_window.back();
        Some(GovernorStats {
            key: key.clone(),
            total_requests: limits.total_requests,
            total_throttles: limits.total_throttles,
            consecutive_throttles: limits.consecutive_throttles,
            success_ratio: limits.success_ratio(),
            throttled_for: limits.throttled_for(now).unwrap_or_default(),
            recent_calls: limits.call_history.len(),
            quota_limit: latest_quota.and_then(|q| q.limit),
            quota_remaining: latest_quota.map(|q| q.remaining),
            circuit_state: entry.breaker.state(),
            since_last_failure: entry
                .breaker
                .last_failure_at()
                .map(|at| now.saturating_duration_since(at)),
            circuit_retry_in: entry.breaker.retry_delay(),
            circuit_metrics: entry.breaker.metrics(),
        })
    }

    /// Every key with state, sorted
    pub fn keys_snapshot(&self) -> Vec<RateLimitKey> {
        let mut keys: Vec<RateLimitKey> = self.keys().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn refuse(key: &RateLimitKey, reason: AdmissionReason, wait: Duration) -> AdmissionDecision {
    let wait = wait.max(MIN_REFUSAL_DELAY);
    debug!(key = %key, reason = %reason, wait_ms = wait.as_millis() as u64, "Admission refused");
    AdmissionDecision::deny(reason, wait)
}
