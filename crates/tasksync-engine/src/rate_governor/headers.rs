//! Parsing of throttle hints and quota metadata from response headers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

pub const RETRY_AFTER: &str = "retry-after";
pub const RETRY_AFTER_MS: &str = "retry-after-ms";
pub const X_MS_RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
pub const RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Reset values above this are absolute unix timestamps rather than deltas
const EPOCH_THRESHOLD_SECS: u64 = 1_000_000_000;

/// Case-insensitive header lookup
pub fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .or_else(|| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
        .map(|v| v.trim())
}

/// Wait requested by a throttling response.
///
/// Millisecond hints win over `Retry-After` since they are more precise.
/// Only the delta-seconds form of `Retry-After` is understood.
pub fn throttle_hint(headers: &HashMap<String, String>) -> Option<Duration> {
    let millis = [RETRY_AFTER_MS, X_MS_RETRY_AFTER_MS]
        .iter()
        .find_map(|name| header(headers, name)?.parse::<u64>().ok())
        .map(Duration::from_millis);

    millis.or_else(|| {
        let value = header(headers, RETRY_AFTER)?;
        value
            .parse::<u64>()
            .map(Duration::from_secs)
            .ok()
            .or_else(|| {
                value
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64)
            })
    })
}

/// Quota headroom advertised by the remote on a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaHeaders {
    pub limit: Option<u64>,
    pub remaining: u64,
    /// Time until the quota window resets
    pub reset_in: Duration,
}

/// Parse `x-ratelimit-*` headers. `remaining` and `reset` are required.
pub fn quota_headers(headers: &HashMap<String, String>) -> Option<QuotaHeaders> {
    let remaining = header(headers, RATELIMIT_REMAINING)?.parse::<u64>().ok()?;
    let reset = header(headers, RATELIMIT_RESET)?.parse::<u64>().ok()?;
    let limit = header(headers, RATELIMIT_LIMIT).and_then(|v| v.parse::<u64>().ok());

    let reset_in = if reset > EPOCH_THRESHOLD_SECS {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        Duration::from_secs(reset.saturating_sub(now))
    } else {
        Duration::from_secs(reset)
    };

    Some(QuotaHeaders {
        limit,
        remaining,
        reset_in,
    })
}
