//! Per-file ingest checkpoints and error accounting (§4.3's state machine
//! steps 1, 7, 8). Owned by the tailer for that path; removed only by
//! explicit administrative action (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::error::Result;
use super::requests::{format_ts, parse_ts};
use super::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportProgress {
    pub path: String,
    pub byte_offset: i64,
    pub file_size: i64,
    pub mtime: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportError {
    pub path: String,
    pub error_count: i64,
    pub last_error: String,
    pub last_error_at: Option<DateTime<Utc>>,
    pub consecutive_successes: i64,
}

impl Database {
    pub async fn get_import_progress(&self, path: &str) -> Result<Option<ImportProgress>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM import_progress WHERE path = ?")
                    .bind(path)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;

        Ok(row.map(|row| ImportProgress {
            path: row.get("path"),
            byte_offset: row.get("byte_offset"),
            file_size: row.get("file_size"),
            mtime: parse_ts(row.get::<String, _>("mtime").as_str()),
            updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
        }))
    }

    /// Idempotent upsert keyed by path, called after every successful
    /// insert (or batch) per §4.3 step 7.
    pub async fn set_import_progress(
        &self,
        path: &str,
        byte_offset: i64,
        file_size: i64,
        mtime: DateTime<Utc>,
    ) -> Result<()> {
        let now = format_ts(Utc::now());
        self.pool
            .with_write_lock(|| async {
                sqlx::query(
                    r#"INSERT INTO import_progress (path, byte_offset, file_size, mtime, updated_at)
                       VALUES (?, ?, ?, ?, ?)
                       ON CONFLICT(path) DO UPDATE SET
                           byte_offset = excluded.byte_offset,
                           file_size = excluded.file_size,
                           mtime = excluded.mtime,
                           updated_at = excluded.updated_at"#,
                )
                .bind(path)
                .bind(byte_offset)
                .bind(file_size)
                .bind(format_ts(mtime))
                .bind(&now)
                .execute(self.pool.inner())
                .await?;
                Ok(())
            })
            .await
    }

    /// Records a parse/insert failure for `path`, bumping the error count
    /// and resetting the consecutive-success counter.
    pub async fn record_import_error(&self, path: &str, message: &str) -> Result<()> {
        let truncated: String = message.chars().take(500).collect();
        let now = format_ts(Utc::now());
        self.pool
            .with_write_lock(|| async {
                sqlx::query(
                    r#"INSERT INTO import_errors (path, error_count, last_error, last_error_at, consecutive_successes)
                       VALUES (?, 1, ?, ?, 0)
                       ON CONFLICT(path) DO UPDATE SET
                           error_count = error_count + 1,
                           last_error = excluded.last_error,
                           last_error_at = excluded.last_error_at,
                           consecutive_successes = 0"#,
                )
                .bind(path)
                .bind(&truncated)
                .bind(&now)
                .execute(self.pool.inner())
                .await?;
                Ok(())
            })
            .await
    }

    /// Called on every successful line; clears the error row once the
    /// sustained-success threshold `n` is reached.
    pub async fn record_import_success(&self, path: &str, clear_after: i64) -> Result<()> {
        self.pool
            .with_write_lock(|| async {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT consecutive_successes FROM import_errors WHERE path = ?")
                        .bind(path)
                        .fetch_optional(self.pool.inner())
                        .await?;
                let Some((successes,)) = existing else { return Ok(()) };

                if successes + 1 >= clear_after {
                    sqlx::query("DELETE FROM import_errors WHERE path = ?")
                        .bind(path)
                        .execute(self.pool.inner())
                        .await?;
                } else {
                    sqlx::query(
                        "UPDATE import_errors SET consecutive_successes = consecutive_successes + 1 WHERE path = ?",
                    )
                    .bind(path)
                    .execute(self.pool.inner())
                    .await?;
                }
                Ok(())
            })
            .await
    }

    pub async fn get_import_error(&self, path: &str) -> Result<Option<ImportError>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM import_errors WHERE path = ?")
                    .bind(path)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;

        Ok(row.map(|row| ImportError {
            path: row.get("path"),
            error_count: row.get("error_count"),
            last_error: row.get("last_error"),
            last_error_at: row
                .get::<Option<String>, _>("last_error_at")
                .map(|s| parse_ts(&s)),
            consecutive_successes: row.get("consecutive_successes"),
        }))
    }

    pub async fn list_import_errors(&self) -> Result<Vec<ImportError>> {
        let rows = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM import_errors ORDER BY path ASC")
                    .fetch_all(self.pool.inner())
                    .await?)
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| ImportError {
                path: row.get("path"),
                error_count: row.get("error_count"),
                last_error: row.get("last_error"),
                last_error_at: row
                    .get::<Option<String>, _>("last_error_at")
                    .map(|s| parse_ts(&s)),
                consecutive_successes: row.get("consecutive_successes"),
            })
            .collect())
    }
}
