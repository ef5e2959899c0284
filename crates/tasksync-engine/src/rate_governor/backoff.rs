//! Backoff curves for retry profiles.

use std::time::Duration;

use tasksync_shared::config::{BackoffStrategy, RetryProfileConfig};

/// Delay before retry `attempt` (1-based), before jitter is applied.
///
/// `success_ratio` only affects the adaptive strategy, which stretches the
/// exponential curve by up to 2x as the ratio drops towards zero.
pub fn base_backoff(profile: &RetryProfileConfig, attempt: u32, success_ratio: f64) -> Duration {
    let attempt = attempt.max(1);
    let base_ms = profile.base_delay().as_millis() as f64;
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);

    let delay_ms = match profile.strategy {
        BackoffStrategy::Exponential => base_ms * profile.multiplier.powi(exponent),
        BackoffStrategy::Linear => base_ms * f64::from(attempt),
        BackoffStrategy::Adaptive => {
            let ratio = success_ratio.clamp(0.0, 1.0);
            base_ms * profile.multiplier.powi(exponent) * (2.0 - ratio)
        }
        BackoffStrategy::Fixed => base_ms,
    };

    cap(delay_ms, profile)
}

/// Apply a jitter fraction and re-cap at the profile maximum
pub fn with_jitter(delay: Duration, jitter: f64, profile: &RetryProfileConfig) -> Duration {
    let jittered = delay.as_millis() as f64 * (1.0 + jitter.max(0.0));
    cap(jittered, profile)
}

/// Uniform sample from the profile's jitter range
pub fn sample_jitter(profile: &RetryProfileConfig) -> f64 {
    let span = (profile.jitter_max - profile.jitter_min).max(0.0);
    profile.jitter_min + fastrand::f64() * span
}

fn cap(delay_ms: f64, profile: &RetryProfileConfig) -> Duration {
    let max_ms = profile.max_delay().as_millis() as f64;
    let bounded = if delay_ms.is_finite() {
        delay_ms.clamp(0.0, max_ms)
    } else {
        max_ms
    };
    Duration::from_millis(bounded.round() as u64)
}
