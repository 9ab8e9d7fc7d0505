//! PostgreSQL storage implementation

use crate::metrics::DB_OPERATION_DURATION;
use crate::models::*;
use crate::repository::{merge_max, merge_min, records_to_i64, DataSourceCatalog, RunRepository};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Instant;
use tracing::{error, instrument, warn};
use tributary_core::{RecordSink, SinkError, SyncedRecord, Watermarks};
use uuid::Uuid;

/// Operations slower than this are logged at warn
const SLOW_OPERATION_MS: u128 = 100;

/// Configuration for the PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: None,
        }
    }
}

impl PoolConfig {
    /// Validate the settings and open a pool
    pub async fn connect(&self, database_url: &str) -> Result<PgPool> {
        if self.min_connections == 0 {
            return Err(crate::Error::ValidationError(
                "min_connections must be > 0".to_string(),
            ));
        }
        if self.max_connections == 0 || self.max_connections < self.min_connections {
            return Err(crate::Error::ValidationError(
                "max_connections must be >= min_connections and > 0".to_string(),
            ));
        }

        let mut opts = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(self.acquire_timeout_secs));

        if let Some(idle) = self.idle_timeout_secs {
            opts = opts.idle_timeout(std::time::Duration::from_secs(idle));
        }
        if let Some(max_life) = self.max_lifetime_secs {
            opts = opts.max_lifetime(std::time::Duration::from_secs(max_life));
        }

        opts.connect(database_url).await.map_err(map_db_error)
    }
}

/// PostgreSQL storage backend
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Create a new PostgreSQL storage instance with default configuration
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_config(database_url, PoolConfig::default()).await
    }

    /// Create a new PostgreSQL storage instance using a PoolConfig
    pub async fn with_pool_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = config.connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute a closure within a transaction
    ///
    /// Commits on success, rolls back on error, and records the latency of
    /// the whole operation under `operation`.
    async fn with_transaction<F, T>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        let result = match f(&mut tx).await {
            Ok(result) => {
                tx.commit().await.map_err(map_db_error)?;
                Ok(result)
            }
            Err(e) => {
                tx.rollback().await.map_err(map_db_error)?;
                Err(e)
            }
        };

        observe_operation(operation, start);
        result
    }

    fn validate_non_empty_string(value: &str, field_name: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(crate::Error::ValidationError(format!(
                "{} cannot be empty",
                field_name
            )));
        }
        Ok(())
    }

    // ========== Data Sources ==========

    /// Insert or replace a data source row
    ///
    /// The orchestrator never writes data sources; this is for provisioning
    /// tools and tests.
    #[instrument(
        skip(self, data_source),
        fields(
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.sql.table = "data_sources",
            tenant_id = %data_source.tenant_id,
            data_source_id = %data_source.id
        )
    )]
    pub async fn upsert_data_source(&self, data_source: &DataSourceModel) -> Result<()> {
        Self::validate_non_empty_string(&data_source.tenant_id, "Tenant id")?;
        Self::validate_non_empty_string(&data_source.provider, "Provider")?;
        let data_source = data_source.clone();

        self.with_transaction("upsert_data_source", |tx| {
            Box::pin(async move {
                sqlx::query(
                    r#"
                    INSERT INTO data_sources (
                        id, tenant_id, provider, enabled, env, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id) DO UPDATE SET
                        tenant_id = EXCLUDED.tenant_id,
                        provider = EXCLUDED.provider,
                        enabled = EXCLUDED.enabled,
                        env = EXCLUDED.env,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(data_source.id)
                .bind(&data_source.tenant_id)
                .bind(&data_source.provider)
                .bind(data_source.enabled)
                .bind(&data_source.env)
                .bind(data_source.created_at)
                .bind(data_source.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "data_sources")
    )]
    pub async fn get_data_source(&self, id: Uuid) -> Result<DataSourceModel> {
        let start = Instant::now();
        let data_source = sqlx::query_as::<_, DataSourceModel>(
            r#"
            SELECT id, tenant_id, provider, enabled, env, created_at, updated_at
            FROM data_sources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| crate::Error::NotFound(format!("Data source {}", id)))?;

        observe_operation("get_data_source", start);
        Ok(data_source)
    }

    // ========== Synced Records ==========

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "synced_records")
    )]
    pub async fn count_records(&self, data_source_id: Uuid, resource: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM synced_records WHERE data_source_id = $1 AND resource = $2",
        )
        .bind(data_source_id)
        .bind(resource)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(count)
    }

    /// Health check for readiness checks
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_db_error)
    }
}

#[async_trait]
impl RunRepository for PostgresStorage {
    #[instrument(
        skip(self),
        fields(
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.sql.table = "sync_runs",
            run_id = tracing::field::Empty
        )
    )]
    async fn create_run(
        &self,
        data_source_id: Uuid,
        script_name: &str,
        batch_id: Uuid,
    ) -> Result<Option<Uuid>> {
        Self::validate_non_empty_string(script_name, "Script name")?;
        let script_name = script_name.to_string();

        let run_id = self
            .with_transaction("create_run", |tx| {
                Box::pin(async move {
                    // Selecting from data_sources makes the claim conditional
                    // on the data source still being enabled.
                    let run_id: Option<Uuid> = sqlx::query_scalar(
                        r#"
                        INSERT INTO sync_runs (
                            id, data_source_id, script_name, batch_id, status, started_at,
                            completed_at, records_imported, error_message, created_at, updated_at
                        )
                        SELECT $1, ds.id, $3, $4, 'running', $5, NULL, 0, NULL, $5, $5
                        FROM data_sources ds
                        WHERE ds.id = $2 AND ds.enabled
                        ON CONFLICT (data_source_id, script_name) DO UPDATE SET
                            batch_id = EXCLUDED.batch_id,
                            status = 'running',
                            started_at = EXCLUDED.started_at,
                            completed_at = NULL,
                            records_imported = 0,
                            error_message = NULL,
                            updated_at = EXCLUDED.updated_at
                        RETURNING id
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(data_source_id)
                    .bind(&script_name)
                    .bind(batch_id)
                    .bind(Utc::now())
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(map_db_error)?;

                    Ok(run_id)
                })
            })
            .await?;

        if let Some(id) = run_id {
            tracing::Span::current().record("run_id", tracing::field::display(id));
        }
        Ok(run_id)
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "sync_runs")
    )]
    async fn complete_run(
        &self,
        run_id: Uuid,
        records_imported: u64,
        new_last_fetched_at: Option<DateTime<Utc>>,
        new_earliest_fetched_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let records = records_to_i64(records_imported)?;

        self.with_transaction("complete_run", |tx| {
            Box::pin(async move {
                // GREATEST/LEAST ignore NULL arguments, so a missing value
                // leaves the stored watermark as it is.
                let result = sqlx::query(
                    r#"
                    UPDATE sync_runs
                    SET status = 'completed',
                        completed_at = $2,
                        records_imported = $3,
                        last_fetched_data_at = GREATEST(last_fetched_data_at, $4),
                        earliest_fetched_data_at = LEAST(earliest_fetched_data_at, $5),
                        error_message = NULL,
                        updated_at = $2
                    WHERE id = $1
                    "#,
                )
                .bind(run_id)
                .bind(Utc::now())
                .bind(records)
                .bind(new_last_fetched_at)
                .bind(new_earliest_fetched_at)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(crate::Error::NotFound(format!("Sync run {}", run_id)));
                }
                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self, error_message),
        fields(db.system = "postgresql", db.operation = "UPDATE", db.sql.table = "sync_runs")
    )]
    async fn fail_run(&self, run_id: Uuid, error_message: &str) -> Result<()> {
        let error_message = error_message.to_string();

        self.with_transaction("fail_run", |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE sync_runs
                    SET status = 'failed',
                        completed_at = $2,
                        error_message = $3,
                        updated_at = $2
                    WHERE id = $1
                    "#,
                )
                .bind(run_id)
                .bind(Utc::now())
                .bind(&error_message)
                .execute(&mut **tx)
                .await
                .map_err(map_db_error)?;

                if result.rows_affected() == 0 {
                    return Err(crate::Error::NotFound(format!("Sync run {}", run_id)));
                }
                Ok(())
            })
        })
        .await
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "sync_runs")
    )]
    async fn watermarks(
        &self,
        data_source_id: Uuid,
        script_name: &str,
    ) -> Result<Option<Watermarks>> {
        let start = Instant::now();
        let row: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT last_fetched_data_at, earliest_fetched_data_at
            FROM sync_runs
            WHERE data_source_id = $1 AND script_name = $2
            "#,
        )
        .bind(data_source_id)
        .bind(script_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        observe_operation("watermarks", start);
        Ok(row.map(|(last, earliest)| Watermarks {
            last_fetched_at: last,
            earliest_fetched_at: earliest,
        }))
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "sync_runs")
    )]
    async fn get_run(&self, run_id: Uuid) -> Result<SyncRunModel> {
        sqlx::query_as::<_, SyncRunModel>(
            r#"
            SELECT id, data_source_id, script_name, batch_id, status, started_at, completed_at,
                   last_fetched_data_at, earliest_fetched_data_at, records_imported,
                   error_message, created_at, updated_at
            FROM sync_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| crate::Error::NotFound(format!("Sync run {}", run_id)))
    }

    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "sync_runs")
    )]
    async fn list_runs(&self, data_source_id: Uuid) -> Result<Vec<SyncRunModel>> {
        sqlx::query_as::<_, SyncRunModel>(
            r#"
            SELECT id, data_source_id, script_name, batch_id, status, started_at, completed_at,
                   last_fetched_data_at, earliest_fetched_data_at, records_imported,
                   error_message, created_at, updated_at
            FROM sync_runs
            WHERE data_source_id = $1
            ORDER BY script_name
            "#,
        )
        .bind(data_source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }
}

#[async_trait]
impl DataSourceCatalog for PostgresStorage {
    #[instrument(
        skip(self),
        fields(db.system = "postgresql", db.operation = "SELECT", db.sql.table = "data_sources")
    )]
    async fn enabled_data_sources(&self) -> Result<Vec<DataSourceModel>> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, DataSourceModel>(
            r#"
            SELECT id, tenant_id, provider, enabled, env, created_at, updated_at
            FROM data_sources
            WHERE enabled
            ORDER BY tenant_id, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        observe_operation("enabled_data_sources", start);
        Ok(rows)
    }
}

#[async_trait]
impl RecordSink for PostgresStorage {
    #[instrument(
        skip(self, records),
        fields(
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.sql.table = "synced_records",
            records = records.len()
        )
    )]
    async fn upsert_records(
        &self,
        data_source_id: Uuid,
        resource: &str,
        records: Vec<SyncedRecord>,
    ) -> std::result::Result<u64, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }
        let resource = resource.to_string();

        self.with_transaction("upsert_records", |tx| {
            Box::pin(async move {
                let synced_at = Utc::now();
                let mut written = 0u64;
                for record in records {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO synced_records (
                            data_source_id, resource, external_id, payload, occurred_at, synced_at
                        ) VALUES ($1, $2, $3, $4, $5, $6)
                        ON CONFLICT (data_source_id, resource, external_id) DO UPDATE SET
                            payload = EXCLUDED.payload,
                            occurred_at = EXCLUDED.occurred_at,
                            synced_at = EXCLUDED.synced_at
                        "#,
                    )
                    .bind(data_source_id)
                    .bind(&resource)
                    .bind(&record.external_id)
                    .bind(sqlx::types::Json(&record.payload))
                    .bind(record.occurred_at)
                    .bind(synced_at)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_db_error)?;
                    written += result.rows_affected();
                }
                Ok(written)
            })
        })
        .await
        .map_err(|e| SinkError(e.to_string()))
    }
}

fn observe_operation(operation: &'static str, start: Instant) {
    let elapsed = start.elapsed();
    DB_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());

    if elapsed.as_millis() > SLOW_OPERATION_MS {
        warn!(
            operation,
            duration_ms = elapsed.as_millis(),
            "Slow database operation detected"
        );
    }
}

/// Fold stored and incoming watermarks the way `complete_run` does in SQL
pub fn merged_watermarks(
    stored: Watermarks,
    new_last: Option<DateTime<Utc>>,
    new_earliest: Option<DateTime<Utc>>,
) -> Watermarks {
    Watermarks {
        last_fetched_at: merge_max(stored.last_fetched_at, new_last),
        earliest_fetched_at: merge_min(stored.earliest_fetched_at, new_earliest),
    }
}

/// Map database errors to appropriate storage errors
pub(crate) fn map_db_error(err: sqlx::Error) -> crate::Error {
    // Map connection-related errors
    match &err {
        sqlx::Error::PoolTimedOut => {
            error!(error = %err, "Connection pool timed out");
            return crate::Error::PoolExhausted("Connection pool timed out".to_string());
        }
        sqlx::Error::PoolClosed => {
            error!(error = %err, "Connection pool closed");
            return crate::Error::ConnectionFailed("Connection pool closed".to_string());
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            error!(error = %err, "Database connection failed");
            return crate::Error::ConnectionFailed(err.to_string());
        }
        _ => {}
    }

    // Map PostgreSQL-specific errors
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code().as_deref() {
            match code {
                // unique_violation - duplicate key
                "23505" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Unique constraint violation"
                    );
                    return crate::Error::AlreadyExists(db_err.message().to_string());
                }
                // foreign_key_violation - referenced record doesn't exist
                "23503" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Foreign key violation"
                    );
                    return crate::Error::NotFound(db_err.message().to_string());
                }
                // not_null_violation / check_violation
                "23502" | "23514" => {
                    warn!(
                        error_code = code,
                        message = db_err.message(),
                        "Constraint violation"
                    );
                    return crate::Error::ValidationError(format!(
                        "Constraint violation: {}",
                        db_err.message()
                    ));
                }
                // too_many_connections
                "53300" => {
                    error!(
                        error_code = code,
                        message = db_err.message(),
                        "Database connection limit reached"
                    );
                    return crate::Error::PoolExhausted(db_err.message().to_string());
                }
                // connection_exception class
                "08006" | "08001" | "08003" | "08004" => {
                    error!(
                        error_code = code,
                        message = db_err.message(),
                        "Database connection failed"
                    );
                    return crate::Error::ConnectionFailed(db_err.message().to_string());
                }
                _ => {
                    error!(
                        error_code = code,
                        message = db_err.message(),
                        "Unexpected database error"
                    );
                }
            }
        }
    }

    error!(error = %err, "Database error");
    crate::Error::Database(err)
}
