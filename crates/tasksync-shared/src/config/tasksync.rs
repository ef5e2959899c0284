//! # Canonical Configuration Types
//!
//! Every recognized option lives here. Each section deserializes with serde
//! defaults so a partial TOML file (or none at all) yields a complete config.
//! Durations are stored as integer `*_ms` / `*_seconds` fields and converted
//! through accessor methods.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSyncConfig {
    pub remote: RemoteConfig,
    pub governor: GovernorConfig,
    pub batch: BatchConfig,
    pub delta: DeltaSyncConfig,
}

/// Remote service endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL every relative path is resolved against
    pub base_url: String,
    /// Upper bound for any single outbound call
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Admission strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorMode {
    /// Explicit throttle signals plus predictive throttling and quota anticipation
    #[default]
    Adaptive,
    /// Explicit throttle signals and the circuit breaker only
    Fixed,
}

/// Backoff curve used by a retry profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    /// Exponential scaled up as the recent success ratio drops
    Adaptive,
    Fixed,
}

/// Retry profile for an endpoint pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryProfileConfig {
    pub strategy: BackoffStrategy,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Lower bound of the jitter fraction added to each delay
    pub jitter_min: f64,
    /// Upper bound of the jitter fraction added to each delay
    pub jitter_max: f64,
}

impl Default for RetryProfileConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_min: 0.0,
            jitter_max: 0.25,
        }
    }
}

impl RetryProfileConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker thresholds applied to every rate-limit key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
            success_threshold: 3,
        }
    }
}

/// Rate governor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// When false every admission check is allowed with reason `disabled`
    pub enabled: bool,
    pub mode: GovernorMode,
    /// Wait applied to a throttling response without a usable hint
    pub default_throttle_wait_seconds: u64,
    /// Cap on the escalated throttle wait
    pub max_throttle_wait_seconds: u64,
    pub predictive_window_seconds: u64,
    /// Calls within the window before predictive throttling engages
    pub predictive_min_calls: usize,
    pub predictive_max_delay_ms: u64,
    /// Admitted-call timestamps retained per key
    pub history_size: usize,
    /// Quota snapshots retained per key
    pub quota_window_size: usize,
    pub circuit_breaker: CircuitBreakerSettings,
    pub default_profile: RetryProfileConfig,
    /// Retry profiles keyed by endpoint pattern (`"POST /$batch"`, `"GET /todo/*"`)
    pub profiles: HashMap<String, RetryProfileConfig>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: GovernorMode::Adaptive,
            default_throttle_wait_seconds: 60,
            max_throttle_wait_seconds: 300,
            predictive_window_seconds: 60,
            predictive_min_calls: 8,
            predictive_max_delay_ms: 10_000,
            history_size: 100,
            quota_window_size: 10,
            circuit_breaker: CircuitBreakerSettings::default(),
            default_profile: RetryProfileConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

impl GovernorConfig {
    pub fn default_throttle_wait(&self) -> Duration {
        Duration::from_secs(self.default_throttle_wait_seconds)
    }

    pub fn max_throttle_wait(&self) -> Duration {
        Duration::from_secs(self.max_throttle_wait_seconds)
    }

    pub fn predictive_window(&self) -> Duration {
        Duration::from_secs(self.predictive_window_seconds)
    }

    pub fn predictive_max_delay(&self) -> Duration {
        Duration::from_millis(self.predictive_max_delay_ms)
    }
}

/// Scheduling order sent to the remote side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Submission order, dependencies ignored for ordering (still validated)
    Submission,
    /// Kahn's algorithm, oldest-added ready operation first
    #[default]
    DependencyAware,
    /// Topological levels, ascending priority within each level
    PriorityAware,
    /// Topological levels, reads/writes/others interleaved within each level
    Performance,
}

/// Who enforces conditional (success-only) dependencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalPolicy {
    /// Statuses are left as returned; the caller inspects `conditional_violations()`
    #[default]
    CallerEnforced,
    /// The scheduler marks operations whose conditional predecessor failed as skipped
    SkipDependents,
}

/// Batch scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_operations: usize,
    pub max_concurrent_batches: usize,
    pub batch_timeout_ms: u64,
    /// Upper bound on time spent waiting for admission before giving up
    pub max_admission_wait_ms: u64,
    /// Relative path of the combined batch endpoint
    pub endpoint: String,
    pub ordering: OrderingStrategy,
    pub conditional_policy: ConditionalPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_operations: 20,
            max_concurrent_batches: 5,
            batch_timeout_ms: 30_000,
            max_admission_wait_ms: 300_000,
            endpoint: "/$batch".to_string(),
            ordering: OrderingStrategy::DependencyAware,
            conditional_policy: ConditionalPolicy::CallerEnforced,
        }
    }
}

impl BatchConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn max_admission_wait(&self) -> Duration {
        Duration::from_millis(self.max_admission_wait_ms)
    }
}

/// Delta sync engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaSyncConfig {
    pub enabled: bool,
    /// Consecutive scope errors after which the next run is a full sync
    pub fallback_error_threshold: u32,
    pub token_ttl_seconds: u64,
    pub max_concurrent_syncs: usize,
    pub conflict_resolution: bool,
    /// Attempts per page fetch
    pub fetch_attempts: u32,
    /// Base inter-attempt delay, multiplied by the attempt number
    pub retry_delay_ms: u64,
    /// Next-page links followed within one run
    pub max_pages: u32,
    pub request_timeout_ms: u64,
    /// Upper bound on time spent waiting for admission per page fetch
    pub max_admission_wait_ms: u64,
    /// Payload field holding the remote modification time (RFC 3339)
    pub modified_field: String,
    /// Payload field holding the version tag
    pub etag_field: String,
    /// Directory for the file-backed token store; in-memory when unset
    pub token_store_dir: Option<String>,
    /// Page size requested from the remote on full syncs
    pub page_size: Option<u32>,
}

impl Default for DeltaSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_error_threshold: 10,
            token_ttl_seconds: 7 * 24 * 60 * 60,
            max_concurrent_syncs: 5,
            conflict_resolution: true,
            fetch_attempts: 3,
            retry_delay_ms: 1_000,
            max_pages: 50,
            request_timeout_ms: 30_000,
            max_admission_wait_ms: 300_000,
            modified_field: "lastModifiedDateTime".to_string(),
            etag_field: "@odata.etag".to_string(),
            token_store_dir: None,
            page_size: None,
        }
    }
}

impl DeltaSyncConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_admission_wait(&self) -> Duration {
        Duration::from_millis(self.max_admission_wait_ms)
    }
}
