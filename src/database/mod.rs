//! # Storage Engine
//!
//! Single-writer, many-reader embedded relational store built on SQLite.
//! Owns the schema, rollup maintenance, analytic reads, session/site CRUD,
//! retention, and health reporting. All mutation is serialized through a
//! single connection guarded by a process-wide write mutex (see
//! [`connection_pool`]); reads never hold that mutex.
//!
//! The public surface is split across sibling modules, each adding an
//! `impl Database` block: [`requests`] (inserts + rollups), [`analytics`]
//! (read-side aggregates), [`sessions`], [`sites`], [`import`] (tailer
//! checkpoints), [`reports`], [`retention`], and [`health`].

mod connection_pool;
mod error;
mod schema;

pub mod analytics;
pub mod health;
pub mod import;
pub mod reports;
pub mod requests;
pub mod retention;
pub mod sessions;
pub mod sites;

pub use connection_pool::{PoolConfig, PoolStats};
pub use error::{DatabaseError, Result};
pub use requests::{RequestRecord, StoredRequest};
pub use sessions::{Session, SessionPermission};
pub use sites::Site;

use connection_pool::ConnectionPool;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;

/// Top-level storage engine configuration, environment-sourced (§10).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: String,
    pub max_connections: u32,
    pub query_timeout: Duration,
    pub default_retention_days: u32,
    pub session_duration: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "sqlite://caddystat.db".to_string(),
            max_connections: 1,
            query_timeout: Duration::from_secs(10),
            default_retention_days: 90,
            session_duration: Duration::from_secs(24 * 3600),
        }
    }
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: "sqlite::memory:".to_string(),
            ..Default::default()
        }
    }
}

/// The storage engine itself. Cheaply clonable (wrap in `Arc` at the
/// application boundary, matching how every other long-lived subsystem in
/// this codebase is shared between tasks).
pub struct Database {
    pool: ConnectionPool,
    default_retention_days: u32,
    session_duration: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Database {
    /// Opens the database, running schema setup. Schema-setup failure is
    /// fatal — this is the "Configuration error" class from §7.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let pool_config = PoolConfig {
            url: config.db_path.clone(),
            max_connections: config.max_connections,
            query_timeout: config.query_timeout,
            ..Default::default()
        };
        let pool = ConnectionPool::new(&pool_config).await?;
        schema::run_migrations(pool.inner()).await?;

        tracing::info!(db_path = %config.db_path, "storage engine opened and migrated");

        Ok(Self {
            pool,
            default_retention_days: config.default_retention_days,
            session_duration: config.session_duration,
            metrics: None,
        })
    }

    /// Threads the process-wide metrics handle into the storage engine so
    /// `insert_request` can record `storage_write_duration_seconds` (§4.9,
    /// §11). Not required: tests and other standalone callers that never
    /// call this leave storage writes uninstrumented.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_retention_days(&self) -> u32 {
        self.default_retention_days
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_database() {
        let db = Database::open(&StorageConfig::in_memory()).await.unwrap();
        assert_eq!(db.default_retention_days(), 90);
    }
}
