//! Migrate command

use crate::config::Config;
use anyhow::{Context, Result};

pub async fn execute(config: &Config) -> Result<()> {
    let storage = super::connect(config).await?;
    tributary_storage::migrations::run_migrations(storage.pool())
        .await
        .context("Failed to apply migrations")?;
    tracing::info!("Migrations applied successfully");
    Ok(())
}
