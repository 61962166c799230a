//! Site (per-host configuration) CRUD.
//!
//! A host that appears in `requests` without a matching `sites` row is
//! still treated as enabled with the global retention default (§3) — the
//! `sites` table is an override layer, not a whitelist of known hosts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::error::{DatabaseError, Result};
use super::requests::{format_ts, parse_ts};
use super::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub host: String,
    pub display_name: String,
    /// 0 means "use the global default".
    pub retention_days: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A site plus its last-24h activity, for the sites list view.
#[derive(Debug, Clone, Serialize)]
pub struct SiteWithActivity {
    #[serde(flatten)]
    pub site: Site,
    pub requests_24h: i64,
    pub bytes_24h: i64,
}

fn row_to_site(row: &sqlx::sqlite::SqliteRow) -> Site {
    Site {
        id: row.get("id"),
        host: row.get("host"),
        display_name: row.get("display_name"),
        retention_days: row.get("retention_days"),
        enabled: row.get::<i32, _>("enabled") != 0,
        created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
        updated_at: parse_ts(row.get::<String, _>("updated_at").as_str()),
    }
}

impl Database {
    pub async fn create_site(
        &self,
        host: &str,
        display_name: &str,
        retention_days: i64,
        enabled: bool,
    ) -> Result<Site> {
        if retention_days < 0 {
            return Err(DatabaseError::InvalidRetention(retention_days));
        }
        let now = Utc::now();

        let id = self
            .pool
            .with_write_lock(|| async {
                let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM sites WHERE host = ?")
                    .bind(host)
                    .fetch_optional(self.pool.inner())
                    .await?;
                if existing.is_some() {
                    return Err(DatabaseError::SiteExists(host.to_string()));
                }
                let result = sqlx::query(
                    "INSERT INTO sites (host, display_name, retention_days, enabled, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(host)
                .bind(display_name)
                .bind(retention_days)
                .bind(enabled as i32)
                .bind(format_ts(now))
                .bind(format_ts(now))
                .execute(self.pool.inner())
                .await?;
                Ok(result.last_insert_rowid())
            })
            .await?;

        Ok(Site {
            id,
            host: host.to_string(),
            display_name: display_name.to_string(),
            retention_days,
            enabled,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM sites WHERE id = ?")
                    .bind(id)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;
        Ok(row.as_ref().map(row_to_site))
    }

    pub async fn update_site(
        &self,
        id: i64,
        display_name: &str,
        retention_days: i64,
        enabled: bool,
    ) -> Result<Site> {
        if retention_days < 0 {
            return Err(DatabaseError::InvalidRetention(retention_days));
        }
        let now = Utc::now();
        self.pool
            .with_write_lock(|| async {
                let result = sqlx::query(
                    "UPDATE sites SET display_name = ?, retention_days = ?, enabled = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(display_name)
                .bind(retention_days)
                .bind(enabled as i32)
                .bind(format_ts(now))
                .bind(id)
                .execute(self.pool.inner())
                .await?;
                if result.rows_affected() == 0 {
                    return Err(DatabaseError::SiteNotFound(id));
                }
                Ok(())
            })
            .await?;

        self.get_site(id).await?.ok_or(DatabaseError::SiteNotFound(id))
    }

    pub async fn delete_site(&self, id: i64) -> Result<()> {
        self.pool
            .with_write_lock(|| async {
                let result = sqlx::query("DELETE FROM sites WHERE id = ?")
                    .bind(id)
                    .execute(self.pool.inner())
                    .await?;
                if result.rows_affected() == 0 {
                    return Err(DatabaseError::SiteNotFound(id));
                }
                Ok(())
            })
            .await
    }

    pub async fn list_sites(&self) -> Result<Vec<SiteWithActivity>> {
        let since = format_ts(Utc::now() - ChronoDuration::hours(24));
        let rows = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM sites ORDER BY host ASC")
                    .fetch_all(self.pool.inner())
                    .await?)
            })
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let site = row_to_site(row);
            let (requests_24h, bytes_24h): (i64, i64) = self
                .pool
                .with_read_timeout(|| async {
                    Ok(sqlx::query_as(
                        "SELECT COUNT(*), COALESCE(SUM(bytes), 0) FROM requests WHERE host = ? AND ts >= ?",
                    )
                    .bind(&site.host)
                    .bind(&since)
                    .fetch_one(self.pool.inner())
                    .await?)
                })
                .await?;
            out.push(SiteWithActivity { site, requests_24h, bytes_24h });
        }
        Ok(out)
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
    async fn create_get_update_delete_roundtrip() {
        let db = test_db().await;
        let site = db.create_site("a.example", "A", 30, true).await.unwrap();
        assert_eq!(site.host, "a.example");

        let fetched = db.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(fetched.retention_days, 30);

        let updated = db.update_site(site.id, "A updated", 10, false).await.unwrap();
        assert_eq!(updated.display_name, "A updated");
        assert!(!updated.enabled);

        db.delete_site(site.id).await.unwrap();
        assert!(db.get_site(site.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_host_is_rejected() {
        let db = test_db().await;
        db.create_site("a.example", "A", 0, true).await.unwrap();
        let err = db.create_site("a.example", "A2", 0, true).await.unwrap_err();
        assert!(matches!(err, DatabaseError::SiteExists(_)));
    }

    #[tokio::test]
    async fn negative_retention_is_rejected() {
        let db = test_db().await;
        let err = db.create_site("a.example", "A", -1, true).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidRetention(-1)));
    }
}
