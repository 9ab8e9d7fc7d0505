//! Distributed advisory locks
//!
//! A lock is a PostgreSQL session-level advisory lock on
//! `hashtextextended(key, 0)`. Session locks belong to the connection that
//! took them, so each held key pins one pooled connection until release.
//! If the worker crashes, its connections drop and the server frees the
//! locks.
//!
//! Lock sessions come from their own pool ([`PgAdvisoryLocks::connect`])
//! so that held locks never take connections away from run tracking or
//! the record sink. When every lock session is in use, `try_acquire`
//! fails after a short wait and the caller skips the script.

use crate::metrics::ADVISORY_LOCK_OPERATIONS;
use crate::postgres::{map_db_error, PoolConfig};
use crate::Result;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Default number of lock sessions one worker may hold at once
pub const DEFAULT_LOCK_CONNECTIONS: u32 = 16;

/// Seconds to wait for a free lock session before giving up
const LOCK_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Cross-process mutual exclusion keyed by a string
#[async_trait]
pub trait AdvisoryLockManager: Send + Sync {
    /// Try to take the lock without waiting.
    ///
    /// Returns `false` when another session (or this manager) holds it.
    async fn try_acquire(&self, key: &str) -> Result<bool>;

    /// Release a lock taken by this manager. Releasing a key this manager
    /// does not hold is a no-op.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Advisory locks backed by dedicated pooled connections
pub struct PgAdvisoryLocks {
    pool: PgPool,
    /// Never held across an await
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgAdvisoryLocks {
    /// Use `pool` for lock sessions. It should not be shared with storage.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Open a dedicated pool of `max_sessions` lock sessions
    pub async fn connect(database_url: &str, max_sessions: u32) -> Result<Self> {
        let pool = Self::pool_config(max_sessions).connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Pool settings for lock sessions: one connection per held key, and a
    /// short acquire timeout so a saturated pool turns into a skip quickly
    pub fn pool_config(max_sessions: u32) -> PoolConfig {
        PoolConfig {
            max_connections: max_sessions,
            min_connections: 1,
            acquire_timeout_secs: LOCK_ACQUIRE_TIMEOUT_SECS,
            idle_timeout_secs: Some(300),
            max_lifetime_secs: None,
        }
    }

    /// Keys currently held by this manager
    pub fn held_keys(&self) -> Vec<String> {
        self.held
            .lock()
            .map(|held| held.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn is_held(&self, key: &str) -> Result<bool> {
        self.held
            .lock()
            .map(|held| held.contains_key(key))
            .map_err(|_| crate::Error::Internal("advisory lock table poisoned".to_string()))
    }
}

#[async_trait]
impl AdvisoryLockManager for PgAdvisoryLocks {
    #[instrument(skip(self), fields(lock_key = %key))]
    async fn try_acquire(&self, key: &str) -> Result<bool> {
        // Session locks are re-entrant on the same connection; a second
        // acquire from this process must still report contention.
        if self.is_held(key)? {
            ADVISORY_LOCK_OPERATIONS
                .with_label_values(&["contended"])
                .inc();
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await.map_err(map_db_error)?;
        let acquired: bool =
            sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                .bind(key)
                .fetch_one(&mut *conn)
                .await
                .map_err(map_db_error)?;

        if !acquired {
            ADVISORY_LOCK_OPERATIONS
                .with_label_values(&["contended"])
                .inc();
            debug!("Advisory lock held by another session");
            return Ok(false);
        }

        let mut held = self
            .held
            .lock()
            .map_err(|_| crate::Error::Internal("advisory lock table poisoned".to_string()))?;
        held.insert(key.to_string(), conn);
        ADVISORY_LOCK_OPERATIONS
            .with_label_values(&["acquired"])
            .inc();
        Ok(true)
    }

    #[instrument(skip(self), fields(lock_key = %key))]
    async fn release(&self, key: &str) -> Result<()> {
        let conn = self
            .held
            .lock()
            .map_err(|_| crate::Error::Internal("advisory lock table poisoned".to_string()))?
            .remove(key);

        let Some(mut conn) = conn else {
            debug!("Release of a lock this manager does not hold");
            return Ok(());
        };

        let unlocked: std::result::Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(key)
                .fetch_one(&mut *conn)
                .await;

        match unlocked {
            Ok(true) => {
                ADVISORY_LOCK_OPERATIONS
                    .with_label_values(&["released"])
                    .inc();
                Ok(())
            }
            other => {
                // Closing the session is the only other way to drop the lock.
                ADVISORY_LOCK_OPERATIONS
                    .with_label_values(&["release_failed"])
                    .inc();
                warn!(result = ?other, "Advisory unlock failed, closing session");
                if let Err(e) = conn.detach().close().await {
                    warn!(error = %e, "Failed to close lock session cleanly");
                }
                match other {
                    Err(e) => Err(map_db_error(e)),
                    _ => Ok(()),
                }
            }
        }
    }
}

impl Drop for PgAdvisoryLocks {
    fn drop(&mut self) {
        // Returning a connection to the pool would keep its locks alive.
        if let Ok(held) = self.held.get_mut() {
            for (key, conn) in held.drain() {
                warn!(lock_key = %key, "Dropping lock manager with lock still held");
                drop(conn.detach());
            }
        }
    }
}
