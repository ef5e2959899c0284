//! # Logging
//!
//! Structured logging setup shared by binaries and integration tests.
//!
//! - Filter: `RUST_LOG`, defaulting to `info`
//! - Format: human-readable by default, JSON when `TASKSYNC_LOG_FORMAT=json`

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "TASKSYNC_LOG_FORMAT";

static INIT: Once = Once::new();

/// Output format for the global subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Resolve the format from `TASKSYNC_LOG_FORMAT`
    pub fn from_env() -> Self {
        match std::env::var(LOG_FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true);

        let result = match LogFormat::from_env() {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.try_init(),
        };

        if let Err(e) = result {
            // Another subscriber (e.g. a test harness) already owns the global slot
            eprintln!("tracing subscriber not installed: {e}");
        }
    });
}
