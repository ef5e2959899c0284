//! # tasksync CLI
//!
//! Operational entry point for the synchronization layer.
//!
//! ## Usage
//!
//! ```bash
//! # Incremental sync of a user's task lists
//! TASKSYNC_ACCESS_TOKEN=... tasksync sync --resource-type todo/lists --user alice
//!
//! # Forced full resync of one list's tasks
//! tasksync sync --resource-type 'todo/lists/{id}/tasks' --resource-id L1 --user alice --full
//!
//! # Drop expired delta tokens from the file token store
//! TASKSYNC__DELTA__TOKEN_STORE_DIR=/var/lib/tasksync tasksync cleanup-tokens
//!
//! # Print the effective configuration
//! tasksync show-config
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tasksync_engine::{RateLimitKey, SystemContext};
use tasksync_shared::config::{ConfigManager, TaskSyncConfig};
use tasksync_shared::logging;
use tasksync_shared::models::SyncScope;

#[derive(Debug, Parser)]
#[command(name = "tasksync")]
#[command(about = "Rate-governed batch and delta synchronization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to TASKSYNC_CONFIG_PATH or config/tasksync.toml)
    #[arg(long, global = true, env = "TASKSYNC_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one delta sync for a scope and print its metrics
    Sync {
        /// Resource type, e.g. `todo/lists` or `todo/lists/{id}/tasks`
        #[arg(long)]
        resource_type: String,

        /// Owning user
        #[arg(long)]
        user: String,

        #[arg(long)]
        tenant: Option<String>,

        /// Parent resource id substituted into the resource type
        #[arg(long)]
        resource_id: Option<String>,

        /// Ignore the stored token and fetch the whole collection
        #[arg(long)]
        full: bool,
    },

    /// Remove expired delta tokens
    CleanupTokens,

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TaskSyncConfig> {
    let config = match path {
        Some(path) => ConfigManager::load_from_path(path),
        None => ConfigManager::load(),
    };
    config.context("failed to load configuration")
}

fn log_governor_state(context: &SystemContext, key: &RateLimitKey) {
    let Some(stats) = context.governor.stats(key) else {
        return;
    };
    let breaker = stats.circuit_metrics.summary();
    if stats.circuit_metrics.is_healthy() {
        info!(
            key = %key,
            requests = stats.total_requests,
            throttles = stats.total_throttles,
            breaker = %breaker,
            "Governor state"
        );
    } else {
        warn!(
            key = %key,
            requests = stats.total_requests,
            throttles = stats.total_throttles,
            breaker = %breaker,
            "Governor state unhealthy"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::CleanupTokens => {
            let context = SystemContext::from_config(config).await?;
            let removed = context.delta.cleanup_expired_tokens().await?;
            println!("removed {removed} expired token(s)");
        }
        Commands::Sync {
            resource_type,
            user,
            tenant,
            resource_id,
            full,
        } => {
            let mut scope = SyncScope::new(resource_type, user);
            if let Some(id) = resource_id {
                scope = scope.with_resource_id(id);
            }
            if let Some(tenant) = tenant {
                scope = scope.with_tenant(tenant);
            }

            let context = SystemContext::from_config(config).await?;
            info!(scope = %scope, full, "Starting sync");
            let result = context.delta.sync(&scope, full).await;
            log_governor_state(&context, &context.delta.rate_limit_key(&scope));
            let metrics = result.with_context(|| format!("sync failed for {scope}"))?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}
