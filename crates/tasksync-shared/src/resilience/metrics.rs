//! # Circuit Breaker Metrics
//!
//! Running counters for one breaker, surfaced through governor stats and
//! logged by the CLI after each sync. Rates are derived on read.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::CircuitState;

/// Counters for a single circuit breaker (one rate-limit key)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Failures since the last success or close
    pub consecutive_failures: u64,
    /// Probes admitted while half-open
    pub probes_admitted: u64,
    /// Times the breaker tripped open
    pub times_opened: u64,
    /// Summed latency of recorded calls
    pub total_duration: Duration,
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, success: bool, duration: Duration) {
        self.total_calls += 1;
        self.total_duration += duration;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }

    /// Fraction of recorded calls that failed; zero before any call
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }

    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.total_calls) {
            Ok(0) => Duration::ZERO,
            Ok(calls) => self.total_duration / calls,
            Err(_) => Duration::from_secs_f64(
                self.total_duration.as_secs_f64() / self.total_calls as f64,
            ),
        }
    }

    /// A closed breaker is healthy below a 10% failure rate; an open one never is
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate() < 0.1,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "{} | calls={} failures={} ({:.1}%) opened={} avg={}ms",
            self.current_state,
            self.total_calls,
            self.failure_count,
            self.failure_rate() * 100.0,
            self.times_opened,
            self.average_duration().as_millis()
        )
    }
}
