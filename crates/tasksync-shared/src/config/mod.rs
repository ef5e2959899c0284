//! # Configuration
//!
//! Layered configuration loading:
//!
//! 1. serde defaults on every section
//! 2. optional TOML file (`TASKSYNC_CONFIG_PATH`, default `config/tasksync.toml`)
//! 3. environment variables `TASKSYNC__<SECTION>__<KEY>` (e.g. `TASKSYNC__DELTA__ENABLED=false`)
//!
//! A `.env` file in the working directory is loaded first so local development
//! can keep overrides out of the shell.

pub mod circuit_breaker;
pub mod tasksync;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use tasksync::{
    BackoffStrategy, BatchConfig, CircuitBreakerSettings, ConditionalPolicy, DeltaSyncConfig,
    GovernorConfig, GovernorMode, OrderingStrategy, RemoteConfig, RetryProfileConfig,
    TaskSyncConfig,
};

/// Environment variable naming the TOML config file
pub const CONFIG_PATH_ENV: &str = "TASKSYNC_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/tasksync.toml";
const ENV_PREFIX: &str = "TASKSYNC";

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Loads and validates `TaskSyncConfig`
#[derive(Debug)]
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from the discovered file and environment
    pub fn load() -> Result<TaskSyncConfig, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path)
    }

    /// Load configuration from an explicit file path (missing file is not an error)
    pub fn load_from_path(path: &Path) -> Result<TaskSyncConfig, ConfigError> {
        debug!(path = %path.display(), "Loading tasksync configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TaskSyncConfig = settings.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Reject configurations that would make the core misbehave
    pub fn validate(config: &TaskSyncConfig) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if config.batch.max_operations == 0 {
            return invalid("batch.max_operations must be > 0");
        }
        if config.batch.max_concurrent_batches == 0 {
            return invalid("batch.max_concurrent_batches must be > 0");
        }
        if config.delta.max_concurrent_syncs == 0 {
            return invalid("delta.max_concurrent_syncs must be > 0");
        }
        if config.delta.fetch_attempts == 0 {
            return invalid("delta.fetch_attempts must be > 0");
        }
        if config.delta.max_admission_wait_ms == 0 || config.batch.max_admission_wait_ms == 0 {
            return invalid("max_admission_wait_ms must be > 0");
        }
        if config.governor.circuit_breaker.failure_threshold == 0 {
            return invalid("governor.circuit_breaker.failure_threshold must be > 0");
        }
        if config.governor.circuit_breaker.success_threshold == 0 {
            return invalid("governor.circuit_breaker.success_threshold must be > 0");
        }
        if config.governor.history_size == 0 {
            return invalid("governor.history_size must be > 0");
        }

        let profiles = std::iter::once(("default", &config.governor.default_profile)).chain(
            config
                .governor
                .profiles
                .iter()
                .map(|(pattern, profile)| (pattern.as_str(), profile)),
        );
        for (pattern, profile) in profiles {
            if profile.max_delay_ms < profile.base_delay_ms {
                return Err(ConfigError::Invalid(format!(
                    "retry profile '{pattern}': max_delay_ms must be >= base_delay_ms"
                )));
            }
            if profile.multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "retry profile '{pattern}': multiplier must be >= 1.0"
                )));
            }
            if !(0.0..=1.0).contains(&profile.jitter_min)
                || !(0.0..=1.0).contains(&profile.jitter_max)
                || profile.jitter_min > profile.jitter_max
            {
                return Err(ConfigError::Invalid(format!(
                    "retry profile '{pattern}': jitter range must satisfy 0 <= min <= max <= 1"
                )));
            }
        }

        Ok(())
    }
}
