//! Generated report artifacts and their recurring schedules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::error::Result;
use super::requests::{format_ts, parse_ts};
use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Daily => "daily",
            ScheduleType::Weekly => "weekly",
            ScheduleType::Monthly => "monthly",
            ScheduleType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ScheduleType::Daily),
            "weekly" => Some(ScheduleType::Weekly),
            "monthly" => Some(ScheduleType::Monthly),
            "custom" => Some(ScheduleType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub host: String,
    pub report_type: String,
    pub format: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub size: i64,
    pub file_name: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: i64,
    pub host: String,
    pub schedule_type: String,
    pub send_day: i32,
    pub send_hour: i32,
    pub timezone: String,
    pub recipients: Vec<String>,
    pub format: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
}

fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> ReportSchedule {
    let recipients_json: String = row.get("recipients");
    ReportSchedule {
        id: row.get("id"),
        host: row.get("host"),
        schedule_type: row.get("schedule_type"),
        send_day: row.get("send_day"),
        send_hour: row.get("send_hour"),
        timezone: row.get("timezone"),
        recipients: serde_json::from_str(&recipients_json).unwrap_or_default(),
        format: row.get("format"),
        enabled: row.get::<i32, _>("enabled") != 0,
        last_run_at: row
            .get::<Option<String>, _>("last_run_at")
            .map(|s| parse_ts(&s)),
        next_run_at: parse_ts(row.get::<String, _>("next_run_at").as_str()),
    }
}

impl Database {
    pub async fn create_report(
        &self,
        host: &str,
        report_type: &str,
        format: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<i64> {
        let size = data.len() as i64;
        let now = Utc::now();
        self.pool
            .with_write_lock(|| async {
                let result = sqlx::query(
                    r#"INSERT INTO reports
                        (host, report_type, format, period_start, period_end, size, file_name, data, generated_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(host)
                .bind(report_type)
                .bind(format)
                .bind(format_ts(period_start))
                .bind(format_ts(period_end))
                .bind(size)
                .bind(file_name)
                .bind(&data)
                .bind(format_ts(now))
                .execute(self.pool.inner())
                .await?;
                Ok(result.last_insert_rowid())
            })
            .await
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM reports WHERE id = ?")
                    .bind(id)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;

        Ok(row.map(|row| Report {
            id: row.get("id"),
            host: row.get("host"),
            report_type: row.get("report_type"),
            format: row.get("format"),
            period_start: parse_ts(row.get::<String, _>("period_start").as_str()),
            period_end: parse_ts(row.get::<String, _>("period_end").as_str()),
            size: row.get("size"),
            file_name: row.get("file_name"),
            data: row.get("data"),
            generated_at: parse_ts(row.get::<String, _>("generated_at").as_str()),
        }))
    }

    pub async fn create_report_schedule(
        &self,
        host: &str,
        schedule_type: &str,
        send_day: i32,
        send_hour: i32,
        timezone: &str,
        recipients: &[String],
        format: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<i64> {
        let recipients_json = serde_json::to_string(recipients)?;
        self.pool
            .with_write_lock(|| async {
                let result = sqlx::query(
                    r#"INSERT INTO report_schedules
                        (host, schedule_type, send_day, send_hour, timezone, recipients, format, enabled, next_run_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)"#,
                )
                .bind(host)
                .bind(schedule_type)
                .bind(send_day)
                .bind(send_hour)
                .bind(timezone)
                .bind(&recipients_json)
                .bind(format)
                .bind(format_ts(next_run_at))
                .execute(self.pool.inner())
                .await?;
                Ok(result.last_insert_rowid())
            })
            .await
    }

    pub async fn get_report_schedule(&self, id: i64) -> Result<Option<ReportSchedule>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM report_schedules WHERE id = ?")
                    .bind(id)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;
        Ok(row.as_ref().map(row_to_schedule))
    }

    /// Schedules that are enabled and due (`next_run_at <= now`), consumed
    /// by the report runner's tick (§4.7).
    pub async fn get_due_report_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ReportSchedule>> {
        let rows = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query(
                    "SELECT * FROM report_schedules WHERE enabled = 1 AND next_run_at <= ? ORDER BY id ASC",
                )
                .bind(format_ts(now))
                .fetch_all(self.pool.inner())
                .await?)
            })
            .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    /// Updated regardless of delivery outcome (§4.7's last sentence).
    pub async fn update_schedule_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.pool
            .with_write_lock(|| async {
                sqlx::query(
                    "UPDATE report_schedules SET last_run_at = ?, next_run_at = ? WHERE id = ?",
                )
                .bind(format_ts(last_run_at))
                .bind(format_ts(next_run_at))
                .bind(id)
                .execute(self.pool.inner())
                .await?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StorageConfig;

    async fn test_db() -> Database {
        Database::open(&StorageConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn due_schedules_respects_enabled_and_next_run_at() {
        let db = test_db().await;
        let now = Utc::now();
        let due_id = db
            .create_report_schedule("a.example", "daily", 0, 6, "UTC", &[], "html", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        db.create_report_schedule(
            "b.example",
            "daily",
            0,
            6,
            "UTC",
            &[],
            "html",
            now + chrono::Duration::hours(1),
        )
        .await
        .unwrap();

        let due = db.get_due_report_schedules(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, due_id);
    }

    #[tokio::test]
    async fn report_roundtrips_with_blob_data() {
        let db = test_db().await;
        let now = Utc::now();
        let id = db
            .create_report(
                "a.example",
                "daily",
                "json",
                now - chrono::Duration::days(1),
                now,
                "report.json",
                b"{}".to_vec(),
            )
            .await
            .unwrap();

        let report = db.get_report(id).await.unwrap().unwrap();
        assert_eq!(report.data, b"{}");
        assert_eq!(report.size, 2);
    }
}
