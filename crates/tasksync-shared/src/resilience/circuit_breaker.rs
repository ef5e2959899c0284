//! # Generic Circuit Breaker
//!
//! Three-state breaker (closed / open / half-open) used by the rate governor
//! for every `(endpoint, tenant, user)` key.
//!
//! ## State machine
//!
//! ```text
//!   Closed --(failures >= failure_threshold)--> Open
//!   Open --(timeout elapsed, next should_allow)--> HalfOpen (one probe admitted)
//!   HalfOpen --(success_threshold consecutive successes)--> Closed
//!   HalfOpen --(any failure)--> Open
//! ```
//!
//! While half-open only a single probe may be in flight. The next probe is
//! admitted once the previous one has been recorded as a success, or once the
//! outstanding probe has been unresolved for a full timeout (its caller was
//! dropped before recording an outcome).

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};

/// Circuit breaker state
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    #[default]
    Closed,
    /// Failing fast, calls are refused
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    probe_started_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

impl BreakerInner {
    fn open(&mut self, now: Instant, timeout: Duration) {
        self.state = CircuitState::Open;
        self.half_open_successes = 0;
        self.probe_started_at = None;
        self.next_attempt_at = Some(now + timeout);
        self.metrics.times_opened += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_successes = 0;
        self.probe_started_at = None;
        self.next_attempt_at = None;
    }

    fn probe_outstanding(&self, now: Instant, lease: Duration) -> bool {
        self.probe_started_at
            .is_some_and(|started| now < started + lease)
    }

    fn sync_metrics(&mut self) {
        self.metrics.current_state = self.state;
        self.metrics.consecutive_failures = u64::from(self.failure_count);
    }
}

/// Thread-safe circuit breaker with interior mutability.
///
/// All state lives behind a `std::sync::Mutex` that is only held for the
/// duration of a single transition, never across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                probe_started_at: None,
                last_failure_at: None,
                next_attempt_at: None,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current state without triggering any transition
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Successes recorded while half-open
    pub fn half_open_successes(&self) -> u32 {
        self.lock().half_open_successes
    }

    /// When the last failure was recorded
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.lock().last_failure_at
    }

    /// When the next probe will be admitted (only set while open)
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.lock().next_attempt_at
    }

    /// Time remaining until a refused call could be admitted.
    ///
    /// Zero when the breaker is closed or a probe slot is free.
    pub fn retry_delay(&self) -> Duration {
        let now = Instant::now();
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => Duration::ZERO,
            CircuitState::Open => inner
                .next_attempt_at
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or(self.config.timeout),
            CircuitState::HalfOpen => match inner.probe_started_at {
                Some(started) if inner.probe_outstanding(now, self.config.timeout) => {
                    (started + self.config.timeout).saturating_duration_since(now)
                }
                _ => Duration::ZERO,
            },
        }
    }

    /// Decide whether the next call may proceed.
    ///
    /// Performs the open → half-open transition when the timeout has elapsed
    /// and admits exactly one probe at a time while half-open.
    pub fn should_allow(&self) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = inner.next_attempt_at.map_or(true, |at| now >= at);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.probe_started_at = Some(now);
                    inner.metrics.probes_admitted += 1;
                    inner.sync_metrics();
                    info!(circuit_breaker = %self.name, "Circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_outstanding(now, self.config.timeout) {
                    false
                } else {
                    inner.probe_started_at = Some(now);
                    inner.metrics.probes_admitted += 1;
                    true
                }
            }
        }
    }

    /// Record a successful call with its duration
    pub fn record_success_manual(&self, duration: Duration) {
        let mut inner = self.lock();
        inner.metrics.record(true, duration);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_started_at = None;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.close();
                    info!(circuit_breaker = %self.name, "Circuit breaker closed after recovery");
                }
            }
            CircuitState::Open => {
                // Late result from a call admitted before the breaker opened
                debug!(circuit_breaker = %self.name, "Ignoring success recorded while open");
            }
        }
        inner.sync_metrics();
    }

    /// Record a failed call with its duration
    pub fn record_failure_manual(&self, duration: Duration) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.metrics.record(false, duration);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open(now, self.config.timeout);
                    warn!(
                        circuit_breaker = %self.name,
                        failures = inner.failure_count,
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.open(now, self.config.timeout);
                warn!(circuit_breaker = %self.name, "Probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
        inner.sync_metrics();
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }
}
