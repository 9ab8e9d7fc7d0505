//! Database migration support

use crate::Result;
use sqlx::PgPool;
use tracing::info;

/// Run all pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");
    let available = migrator.iter().count();

    migrator
        .run(pool)
        .await
        .map_err(|e| crate::Error::Migration(e.to_string()))?;

    info!(migrations = available, "Database schema is up to date");
    Ok(())
}
