//! CLI command implementations

pub mod daemon;
pub mod migrate;
pub mod run;
pub mod scripts;
pub mod status;

use crate::config::{mask_password, Config};
use anyhow::{Context, Result};
use std::sync::Arc;
use tributary_core::SystemClock;
use tributary_runtime::{BatchOrchestrator, ExecutionGraphRunner, RunTracker, ScriptExecutor};
use tributary_storage::{PgAdvisoryLocks, PostgresStorage};

/// Connect to the store described by `config`
pub async fn connect(config: &Config) -> Result<PostgresStorage> {
    tracing::info!(database_url = %mask_password(&config.database_url), "Connecting to database");
    PostgresStorage::with_pool_config(&config.database_url, config.pool.clone())
        .await
        .context("Failed to connect to database")
}

/// Wire the orchestrator over a Postgres store and the built-in providers.
///
/// Advisory locks get their own pool so held locks cannot starve the store.
pub async fn build_orchestrator(
    storage: &PostgresStorage,
    config: &Config,
) -> Result<BatchOrchestrator> {
    let registry =
        tributary_connectors::builtin_registry().context("Failed to register providers")?;
    let shared = Arc::new(storage.clone());
    let locks = PgAdvisoryLocks::connect(&config.database_url, config.lock_connections)
        .await
        .context("Failed to open advisory lock pool")?;

    let executor = ScriptExecutor::new(
        Arc::new(locks),
        RunTracker::new(shared.clone()),
        shared.clone(),
        Arc::new(SystemClock),
        config.runtime.clone(),
    );

    Ok(BatchOrchestrator::new(
        shared,
        registry,
        ExecutionGraphRunner::new(executor),
    ))
}
