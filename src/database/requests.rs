//! Base-row inserts and the synchronous rollup maintenance that rides along
//! with them, plus the recent-requests read path.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::error::Result;
use super::Database;

/// One ingested access-log line, already enriched and privacy-filtered.
/// Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub path: String,
    pub status: i32,
    pub bytes: i64,
    pub ip: String,
    pub referrer: String,
    pub user_agent: String,
    pub response_time_ms: f64,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub is_bot: bool,
    pub bot_name: Option<String>,
    pub bot_intent: Option<String>,
}

/// A request row as it comes back out of storage, with its primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRequest {
    pub id: i64,
    #[serde(flatten)]
    pub record: RequestRecord,
}

pub(super) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Tolerant timestamp parsing: the source format round-trips through
/// several string shapes historically, so reads fall back from strict
/// RFC3339 to a naive "YYYY-MM-DD HH:MM:SS" shape before giving up.
pub(super) fn parse_ts(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return DateTime::from_naive_utc_and_offset(naive, Utc);
    }
    Utc::now()
}

fn truncate_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

fn truncate_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(ts)
}

/// Status-class bucket for a rollup increment. Outside [200, 599] the
/// request doesn't contribute to any class counter.
fn status_column(status: i32) -> Option<&'static str> {
    match status {
        200..=299 => Some("status_2xx"),
        300..=399 => Some("status_3xx"),
        400..=499 => Some("status_4xx"),
        500..=599 => Some("status_5xx"),
        _ => None,
    }
}

impl Database {
    /// Atomic insert + hourly/daily rollup upsert, per §4.1's write
    /// protocol. A single transaction; any error rolls the whole thing back.
    pub async fn insert_request(&self, record: &RequestRecord) -> Result<i64> {
        let write_started = std::time::Instant::now();
        let result = self
            .pool
            .with_write_lock(|| async {
                let mut tx = self.pool.inner().begin().await?;

                let ts = format_ts(record.timestamp);
                let result = sqlx::query(
                    r#"INSERT INTO requests
                        (ts, host, path, status, bytes, ip, referrer, user_agent,
                         response_time_ms, country, region, city, browser,
                         browser_version, os, os_version, device_type, is_bot,
                         bot_name, bot_intent)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(&ts)
                .bind(&record.host)
                .bind(&record.path)
                .bind(record.status)
                .bind(record.bytes)
                .bind(&record.ip)
                .bind(&record.referrer)
                .bind(&record.user_agent)
                .bind(record.response_time_ms)
                .bind(&record.country)
                .bind(&record.region)
                .bind(&record.city)
                .bind(&record.browser)
                .bind(&record.browser_version)
                .bind(&record.os)
                .bind(&record.os_version)
                .bind(&record.device_type)
                .bind(record.is_bot as i32)
                .bind(&record.bot_name)
                .bind(&record.bot_intent)
                .execute(&mut *tx)
                .await?;
                let id = result.last_insert_rowid();

                for (table, bucket) in [
                    ("rollups_hourly", truncate_hour(record.timestamp)),
                    ("rollups_daily", truncate_day(record.timestamp)),
                ] {
                    let bucket_str = format_ts(bucket);
                    let status_col = status_column(record.status);
                    let status_inc = if status_col.is_some() { 1 } else { 0 };
                    let sql = format!(
                        r#"INSERT INTO {table} (bucket_start, host, path, requests, bytes,
                               status_2xx, status_3xx, status_4xx, status_5xx)
                           VALUES (?, ?, ?, 1, ?, {s2}, {s3}, {s4}, {s5})
                           ON CONFLICT(bucket_start, host, path) DO UPDATE SET
                               requests = requests + 1,
                               bytes = bytes + excluded.bytes,
                               status_2xx = status_2xx + {s2},
                               status_3xx = status_3xx + {s3},
                               status_4xx = status_4xx + {s4},
                               status_5xx = status_5xx + {s5}"#,
                        table = table,
                        s2 = if status_col == Some("status_2xx") { status_inc } else { 0 },
                        s3 = if status_col == Some("status_3xx") { status_inc } else { 0 },
                        s4 = if status_col == Some("status_4xx") { status_inc } else { 0 },
                        s5 = if status_col == Some("status_5xx") { status_inc } else { 0 },
                    );
                    sqlx::query(&sql)
                        .bind(&bucket_str)
                        .bind(&record.host)
                        .bind(&record.path)
                        .bind(record.bytes)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await?;
                Ok(id)
            })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.storage_write_duration_seconds.observe(write_started.elapsed().as_secs_f64());
        }
        result
    }

    /// Always constrained to the last 24h and capped at 100 rows, newest
    /// first, per §4.1's recent-request query rule.
    pub async fn recent_requests(&self, host: Option<&str>, limit: u32) -> Result<Vec<StoredRequest>> {
        let limit = limit.min(100).max(1);
        let since = format_ts(Utc::now() - ChronoDuration::hours(24));
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let rows = if let Some(host) = host {
                    sqlx::query(
                        "SELECT * FROM requests WHERE ts >= ? AND host = ? ORDER BY ts DESC, id DESC LIMIT ?",
                    )
                    .bind(&since)
                    .bind(host)
                    .bind(limit as i64)
                    .fetch_all(self.pool.inner())
                    .await?
                } else {
                    sqlx::query("SELECT * FROM requests WHERE ts >= ? ORDER BY ts DESC, id DESC LIMIT ?")
                        .bind(&since)
                        .bind(limit as i64)
                        .fetch_all(self.pool.inner())
                        .await?
                };
                Ok(rows)
            })
            .await?;

        Ok(rows.iter().map(row_to_stored).collect())
    }

    /// Streaming export: invokes `callback` with batches of rows ordered by
    /// id ascending so callers (CSV/JSON export) can write incrementally
    /// without buffering the whole table in memory.
    pub async fn stream_requests<F>(
        &self,
        host: Option<&str>,
        since: Option<DateTime<Utc>>,
        batch_size: u32,
        mut callback: F,
    ) -> Result<()>
    where
        F: FnMut(&[StoredRequest]) -> Result<()>,
    {
        let mut last_id = 0i64;
        loop {
            let rows = self
                .pool
                .with_read_timeout(|| async {
                    let mut qb = String::from("SELECT * FROM requests WHERE id > ?");
                    if host.is_some() {
                        qb.push_str(" AND host = ?");
                    }
                    if since.is_some() {
                        qb.push_str(" AND ts >= ?");
                    }
                    qb.push_str(" ORDER BY id ASC LIMIT ?");

                    let mut query = sqlx::query(&qb).bind(last_id);
                    if let Some(h) = host {
                        query = query.bind(h);
                    }
                    if let Some(s) = since {
                        query = query.bind(format_ts(s));
                    }
                    query = query.bind(batch_size as i64);
                    Ok(query.fetch_all(self.pool.inner()).await?)
                })
                .await?;

            if rows.is_empty() {
                break;
            }
            let batch: Vec<StoredRequest> = rows.iter().map(row_to_stored).collect();
            last_id = batch.last().map(|r| r.id).unwrap_or(last_id);
            callback(&batch)?;
            if batch.len() < batch_size as usize {
                break;
            }
        }
        Ok(())
    }
}

fn row_to_stored(row: &sqlx::sqlite::SqliteRow) -> StoredRequest {
    StoredRequest {
        id: row.get("id"),
        record: RequestRecord {
            timestamp: parse_ts(row.get::<String, _>("ts").as_str()),
            host: row.get("host"),
            path: row.get("path"),
            status: row.get("status"),
            bytes: row.get("bytes"),
            ip: row.get("ip"),
            referrer: row.get("referrer"),
            user_agent: row.get("user_agent"),
            response_time_ms: row.get("response_time_ms"),
            country: row.get("country"),
            region: row.get("region"),
            city: row.get("city"),
            browser: row.get("browser"),
            browser_version: row.get("browser_version"),
            os: row.get("os"),
            os_version: row.get("os_version"),
            device_type: row.get("device_type"),
            is_bot: row.get::<i32, _>("is_bot") != 0,
            bot_name: row.get("bot_name"),
            bot_intent: row.get("bot_intent"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, StorageConfig};

    fn sample_record(host: &str, status: i32, ts: DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            timestamp: ts,
            host: host.to_string(),
            path: "/x".to_string(),
            status,
            bytes: 100,
            ip: "1.2.3.4".to_string(),
            referrer: String::new(),
            user_agent: "curl/8".to_string(),
            response_time_ms: 12.5,
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

    async fn test_db() -> Database {
        Database::open(&StorageConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_recent_requests_roundtrips() {
        let db = test_db().await;
        let now = Utc::now();
        db.insert_request(&sample_record("a.example", 200, now))
            .await
            .unwrap();

        let rows = db.recent_requests(Some("a.example"), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.host, "a.example");
        assert_eq!(rows[0].record.status, 200);
    }

    #[tokio::test]
    async fn rollup_matches_request_count_in_its_bucket() {
        let db = test_db().await;
        let now = Utc::now();
        for _ in 0..3 {
            db.insert_request(&sample_record("a.example", 200, now))
                .await
                .unwrap();
        }

        let bucket = format_ts(truncate_hour(now));
        let row: (i64,) = sqlx::query_as(
            "SELECT requests FROM rollups_hourly WHERE bucket_start = ? AND host = ? AND path = ?",
        )
        .bind(&bucket)
        .bind("a.example")
        .bind("/x")
        .fetch_one(db.pool.inner())
        .await
        .unwrap();
        assert_eq!(row.0, 3);
    }

    #[tokio::test]
    async fn status_outside_200_599_contributes_to_no_class() {
        let db = test_db().await;
        let now = Utc::now();
        db.insert_request(&sample_record("a.example", 101, now))
            .await
            .unwrap();

        let bucket = format_ts(truncate_hour(now));
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT requests, status_2xx, status_3xx, status_4xx, status_5xx
             FROM rollups_hourly WHERE bucket_start = ? AND host = ? AND path = ?",
        )
        .bind(&bucket)
        .bind("a.example")
        .bind("/x")
        .fetch_one(db.pool.inner())
        .await
        .unwrap();
        assert_eq!(row.0, 1);
        assert_eq!(row.1 + row.2 + row.3 + row.4, 0);
    }
}
