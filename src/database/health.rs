//! Liveness/readiness checks and operational stats, backing `GET /health`
//! and the metrics catalogue (§11).

use serde::Serialize;

use super::error::Result;
use super::Database;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_requests: i64,
    pub total_sites: i64,
    pub total_sessions: i64,
    pub db_file_bytes: u64,
    pub pool_total_acquired: u64,
    pub pool_write_transactions: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub healthy: bool,
    pub db: DatabaseStats,
    pub uptime_seconds: u64,
}

impl Database {
    /// Cheapest possible liveness probe.
    pub async fn ping(&self) -> Result<()> {
        self.pool
            .with_read_timeout(|| async {
                sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
                Ok(())
            })
            .await
    }

    pub async fn health(&self) -> bool {
        self.ping().await.is_ok()
    }

    pub async fn get_database_stats(&self) -> Result<DatabaseStats> {
        let (requests, sites, sessions) = self
            .pool
            .with_read_timeout(|| async {
                let requests: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests")
                    .fetch_one(self.pool.inner())
                    .await?;
                let sites: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sites")
                    .fetch_one(self.pool.inner())
                    .await?;
                let sessions: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
                    .fetch_one(self.pool.inner())
                    .await?;
                Ok((requests.0, sites.0, sessions.0))
            })
            .await?;

        let pool_stats = self.pool.stats();
        Ok(DatabaseStats {
            total_requests: requests,
            total_sites: sites,
            total_sessions: sessions,
            db_file_bytes: self.db_file_size(),
            pool_total_acquired: pool_stats.total_acquired,
            pool_write_transactions: pool_stats.total_write_transactions,
        })
    }

    pub async fn get_system_status(&self, started_at: std::time::Instant) -> Result<SystemStatus> {
        Ok(SystemStatus {
            healthy: self.health().await,
            db: self.get_database_stats().await?,
            uptime_seconds: started_at.elapsed().as_secs(),
        })
    }

    /// Best-effort file size of the SQLite database file (0 for `:memory:`).
    pub fn db_file_size(&self) -> u64 {
        self.pool
            .file_path()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }
}
