//! # Circuit Breaker Configuration Adapters
//!
//! Conversions from the canonical TOML settings to resilience module types.

use std::time::Duration;

pub use crate::config::tasksync::CircuitBreakerSettings;

impl CircuitBreakerSettings {
    /// Convert to the resilience module's runtime format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.timeout_seconds),
            success_threshold: self.success_threshold,
        }
    }
}
