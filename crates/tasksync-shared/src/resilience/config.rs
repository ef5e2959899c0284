//! Runtime circuit breaker configuration (durations already resolved).

use std::time::Duration;

/// Configuration for a single circuit breaker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub timeout: Duration,
    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}
