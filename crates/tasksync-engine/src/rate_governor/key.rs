//! Rate-limit keys and admission decisions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of an independent admission-control and circuit-breaker state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RateLimitKey {
    /// Endpoint pattern, e.g. `"POST /$batch"` or `"GET /tasks/delta"`
    pub endpoint: String,
    pub tenant_id: Option<String>,
    pub user_id: String,
}

impl RateLimitKey {
    pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tenant_id: None,
            user_id: user_id.into(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tenant={} user={}",
            self.endpoint,
            self.tenant_id.as_deref().unwrap_or("-"),
            self.user_id
        )
    }
}

/// Why an admission check resolved the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionReason {
    /// Admission control is switched off
    Disabled,
    /// The key's circuit breaker refuses calls
    CircuitOpen,
    /// The remote asked us to back off
    Throttled,
    /// Cadence or quota headroom suggests the remote is about to throttle
    PredictiveThrottle,
    WithinLimits,
}

impl AdmissionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::CircuitOpen => "circuit_open",
            Self::Throttled => "throttled",
            Self::PredictiveThrottle => "predictive_throttle",
            Self::WithinLimits => "within_limits",
        }
    }
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `RateGovernor::check_admission`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    /// How long to wait before checking again. Zero when allowed.
    pub delay: Duration,
    pub reason: AdmissionReason,
}

impl AdmissionDecision {
    pub fn allow(reason: AdmissionReason) -> Self {
        Self {
            allowed: true,
            delay: Duration::ZERO,
            reason,
        }
    }

    pub fn deny(reason: AdmissionReason, delay: Duration) -> Self {
        Self {
            allowed: false,
            delay,
            reason,
        }
    }
}
