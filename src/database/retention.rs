//! Destructive retention cleanup and VACUUM (§4.1's Retention subsection).
//! Rollup tables are intentionally never pruned here — they are append-only,
//! surviving base-row deletion for long-range dashboards (§9 ambiguous-
//! behavior note (a)).

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;

use super::error::Result;
use super::requests::format_ts;
use super::Database;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub per_site_deleted: Vec<(String, u64)>,
    pub global_deleted: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VacuumReport {
    pub bytes_freed: i64,
}

impl Database {
    /// Simple global-only cleanup: deletes every row older than
    /// `default_days`, ignoring per-site overrides.
    pub async fn cleanup(&self, default_days: u32) -> Result<u64> {
        let cutoff = format_ts(Utc::now() - ChronoDuration::days(default_days as i64));
        self.pool
            .with_write_lock(|| async {
                let result = sqlx::query("DELETE FROM requests WHERE ts < ?")
                    .bind(&cutoff)
                    .execute(self.pool.inner())
                    .await?;
                Ok(result.rows_affected())
            })
            .await
    }

    /// Implements §4.1's four-step algorithm:
    /// 1. Enumerate sites with `retention_days > 0`.
    /// 2. Delete rows for each such site older than its own retention.
    /// 3. Delete all other rows older than `global_days`.
    /// 4. Return per-site and global counts.
    pub async fn cleanup_with_per_site_retention(&self, global_days: u32) -> Result<RetentionReport> {
        let now = Utc::now();
        self.pool
            .with_write_lock(|| async {
                let mut tx = self.pool.inner().begin().await?;

                let custom_sites: Vec<(String, i64)> =
                    sqlx::query_as("SELECT host, retention_days FROM sites WHERE retention_days > 0")
                        .fetch_all(&mut *tx)
                        .await?;

                let mut per_site_deleted = Vec::with_capacity(custom_sites.len());
                for (host, retention_days) in &custom_sites {
                    let cutoff = format_ts(now - ChronoDuration::days(*retention_days));
                    let result = sqlx::query("DELETE FROM requests WHERE host = ? AND ts < ?")
                        .bind(host)
                        .bind(&cutoff)
                        .execute(&mut *tx)
                        .await?;
                    per_site_deleted.push((host.clone(), result.rows_affected()));
                }

                let global_cutoff = format_ts(now - ChronoDuration::days(global_days as i64));
                let global_deleted = if custom_sites.is_empty() {
                    sqlx::query("DELETE FROM requests WHERE ts < ?")
                        .bind(&global_cutoff)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected()
                } else {
                    let placeholders = custom_sites.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                    let sql = format!(
                        "DELETE FROM requests WHERE ts < ? AND host NOT IN ({placeholders})"
                    );
                    let mut query = sqlx::query(&sql).bind(&global_cutoff);
                    for (host, _) in &custom_sites {
                        query = query.bind(host);
                    }
                    query.execute(&mut *tx).await?.rows_affected()
                };

                tx.commit().await?;
                Ok(RetentionReport { per_site_deleted, global_deleted })
            })
            .await
    }

    pub async fn vacuum(&self) -> Result<VacuumReport> {
        let before = self.db_file_size() as i64;
        self.pool
            .with_write_lock(|| async {
                sqlx::query("VACUUM").execute(self.pool.inner()).await?;
                Ok(())
            })
            .await?;
        let after = self.db_file_size() as i64;
        Ok(VacuumReport { bytes_freed: (before - after).max(0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::requests::RequestRecord;
    use crate::database::StorageConfig;
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::open(&StorageConfig::in_memory()).await.unwrap()
    }

    fn record_at(host: &str, ts: chrono::DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            timestamp: ts,
            host: host.to_string(),
            path: "/x".to_string(),
            status: 200,
            bytes: 1,
            ip: "1.2.3.4".to_string(),
            referrer: String::new(),
            user_agent: "ua".to_string(),
            response_time_ms: 1.0,
            country: None,
            region: None,
            city: None,
            browser: None,
            browser_version: None,
            os: None,
            os_version: None,
            device_type: None,
            is_bot: false,
            bot_name: None,
            bot_intent: None,
        }
    }

    #[tokio::test]
    async fn per_site_retention_respects_overrides_and_preserves_rollups() {
        let db = test_db().await;
        let now = Utc::now();
        db.create_site("a.example", "A", 3, true).await.unwrap();

        // a.example: one row at 5 days old (should be deleted, > 3d), one at 1 day (kept).
        db.insert_request(&record_at("a.example", now - Duration::days(5))).await.unwrap();
        db.insert_request(&record_at("a.example", now - Duration::days(1))).await.unwrap();
        // b.example (no override): one row at 10 days (deleted, > 7d global), one at 2 days (kept).
        db.insert_request(&record_at("b.example", now - Duration::days(10))).await.unwrap();
        db.insert_request(&record_at("b.example", now - Duration::days(2))).await.unwrap();

        let report = db.cleanup_with_per_site_retention(7).await.unwrap();
        assert_eq!(report.per_site_deleted, vec![("a.example".to_string(), 1)]);
        assert_eq!(report.global_deleted, 1);

        let (a_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests WHERE host = 'a.example'")
            .fetch_one(db.pool.inner())
            .await
            .unwrap();
        assert_eq!(a_count, 1);
        let (b_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests WHERE host = 'b.example'")
            .fetch_one(db.pool.inner())
            .await
            .unwrap();
        assert_eq!(b_count, 1);

        // rollups untouched
        let (rollup_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rollups_daily")
            .fetch_one(db.pool.inner())
            .await
            .unwrap();
        assert!(rollup_count >= 2);
    }
}
