//! A SQLite pool pinned at a single live connection.
//!
//! Caddystat's storage engine is deliberately not a multi-writer pool: the
//! spec requires writer serialization to be structural, not merely
//! advisory, so `max_connections` is always 1 regardless of what an
//! operator configures. A process-wide write mutex on top of that single
//! connection serializes multi-statement transactions (insert + rollup
//! upserts) so that no interleaving of statements from two writers is
//! observable.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::error::{DatabaseError, Result};

/// Tuning knobs for the storage engine's connection pool.
///
/// `max_connections` is accepted for operator familiarity with conventional
/// pooled drivers but has no effect: the pool is always sized 1.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub busy_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://caddystat.db".to_string(),
            max_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
            busy_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub total_acquired: u64,
    pub total_write_transactions: u64,
    pub total_wait_micros: u64,
}

/// The storage engine's single-connection pool plus the process-wide write
/// mutex layered on top of it.
pub struct ConnectionPool {
    pool: SqlitePool,
    write_lock: Arc<AsyncMutex<()>>,
    query_timeout: Duration,
    acquired: AtomicU64,
    write_txns: AtomicU64,
    wait_micros: AtomicU64,
    file_path: Option<String>,
}

impl ConnectionPool {
    pub async fn new(config: &PoolConfig) -> Result<Self> {
        let path = config.url.strip_prefix("sqlite://").unwrap_or(&config.url);
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA cache_size = -8000;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA temp_store = MEMORY;")
            .execute(&pool)
            .await?;

        let file_path = if path == ":memory:" {
            None
        } else {
            Some(path.to_string())
        };

        Ok(Self {
            pool,
            write_lock: Arc::new(AsyncMutex::new(())),
            query_timeout: config.query_timeout,
            acquired: AtomicU64::new(0),
            write_txns: AtomicU64::new(0),
            wait_micros: AtomicU64::new(0),
            file_path,
        })
    }

    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Filesystem path of the backing database file, `None` for `:memory:`.
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Runs `f` with the process-wide write mutex held, bounding total wait
    /// with the configured query timeout. Used for every multi-statement
    /// write (insert + rollup upsert, retention sweeps, vacuum).
    pub async fn with_write_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let wait_start = Instant::now();
        let _guard = tokio::time::timeout(self.query_timeout, self.write_lock.lock())
            .await
            .map_err(|_| DatabaseError::Timeout(self.query_timeout))?;
        self.wait_micros
            .fetch_add(wait_start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.write_txns.fetch_add(1, Ordering::Relaxed);

        tokio::time::timeout(self.query_timeout, f())
            .await
            .map_err(|_| DatabaseError::Timeout(self.query_timeout))?
    }

    /// Runs a read with the configured per-query timeout but without the
    /// write mutex (reads never hold it; they may still block behind a
    /// writer at the driver level since the pool has exactly one connection).
    pub async fn with_read_timeout<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        tokio::time::timeout(self.query_timeout, f())
            .await
            .map_err(|_| DatabaseError::Timeout(self.query_timeout))?
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_write_transactions: self.write_txns.load(Ordering::Relaxed),
            total_wait_micros: self.wait_micros.load(Ordering::Relaxed),
        }
    }
}
