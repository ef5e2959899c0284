//! # Resilience
//!
//! Circuit breaker primitives shared by every outbound call path. The rate
//! governor owns one `CircuitBreaker` per rate-limit key; nothing else mutates
//! breaker state.

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
