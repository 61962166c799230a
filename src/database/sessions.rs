//! Session CRUD and per-session site permissions.
//!
//! Sessions carry opaque, high-entropy tokens generated at the HTTP layer
//! (see `crate::api::auth`); this module only persists and validates them.
//! Expiry is checked lazily on `get_session` and swept periodically by the
//! janitor (§4.6), matching §4.1's failure-semantics note.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use super::error::Result;
use super::requests::{format_ts, parse_ts};
use super::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Either "all sites" or an explicit allow-list of hosts. Deleted with the
/// session it belongs to (enforced by cascading the delete, not a foreign
/// key — sessions reference sites only loosely, by host string, per §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPermission {
    pub token: String,
    pub all_sites: bool,
    pub allowed_hosts: Vec<String>,
}

impl Database {
    /// Creates a session expiring `session_duration` from now, plus its
    /// permission row. `allowed_hosts = None` means "all sites".
    pub async fn create_session(&self, token: &str, allowed_hosts: Option<Vec<String>>) -> Result<Session> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::from_std(self.session_duration()).unwrap_or(ChronoDuration::hours(24));

        self.pool
            .with_write_lock(|| async {
                let mut tx = self.pool.inner().begin().await?;
                sqlx::query("INSERT INTO sessions (token, created_at, expires_at) VALUES (?, ?, ?)")
                    .bind(token)
                    .bind(format_ts(now))
                    .bind(format_ts(expires_at))
                    .execute(&mut *tx)
                    .await?;

                let all_sites = allowed_hosts.is_none();
                let hosts_json = serde_json::to_string(&allowed_hosts.unwrap_or_default())?;
                sqlx::query(
                    "INSERT INTO session_permissions (token, all_sites, allowed_hosts) VALUES (?, ?, ?)",
                )
                .bind(token)
                .bind(all_sites as i32)
                .bind(&hosts_json)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(())
            })
            .await?;

        Ok(Session { token: token.to_string(), created_at: now, expires_at })
    }

    /// Returns `None` if absent or expired. An expired row found here is
    /// deleted on the spot as a lazy-expiry check.
    pub async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM sessions WHERE token = ?")
                    .bind(token)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;

        let Some(row) = row else { return Ok(None) };
        let expires_at = parse_ts(row.get::<String, _>("expires_at").as_str());
        if expires_at <= Utc::now() {
            self.delete_session(token).await?;
            return Ok(None);
        }
        Ok(Some(Session {
            token: row.get("token"),
            created_at: parse_ts(row.get::<String, _>("created_at").as_str()),
            expires_at,
        }))
    }

    pub async fn get_session_permission(&self, token: &str) -> Result<Option<SessionPermission>> {
        let row = self
            .pool
            .with_read_timeout(|| async {
                Ok(sqlx::query("SELECT * FROM session_permissions WHERE token = ?")
                    .bind(token)
                    .fetch_optional(self.pool.inner())
                    .await?)
            })
            .await?;

        let Some(row) = row else { return Ok(None) };
        let hosts_json: String = row.get("allowed_hosts");
        Ok(Some(SessionPermission {
            token: row.get("token"),
            all_sites: row.get::<i32, _>("all_sites") != 0,
            allowed_hosts: serde_json::from_str(&hosts_json).unwrap_or_default(),
        }))
    }

    /// Deletes a session and cascades into its permission row (§3's
    /// lifecycle rule: sessions and permissions share lifetime).
    pub async fn delete_session(&self, token: &str) -> Result<()> {
        self.pool
            .with_write_lock(|| async {
                let mut tx = self.pool.inner().begin().await?;
                sqlx::query("DELETE FROM session_permissions WHERE token = ?")
                    .bind(token)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM sessions WHERE token = ?")
                    .bind(token)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }

    /// `all_sites = true` OR `host` in the allow-list passes; an empty
    /// `host` (aggregate view) always passes.
    pub async fn has_site_permission(&self, token: &str, host: &str) -> Result<bool> {
        if host.is_empty() {
            return Ok(true);
        }
        match self.get_session_permission(token).await? {
            Some(perm) => Ok(perm.all_sites || perm.allowed_hosts.iter().any(|h| h == host)),
            None => Ok(false),
        }
    }

    /// Swept periodically by the janitor; returns the number of rows
    /// deleted.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let now = format_ts(Utc::now());
        self.pool
            .with_write_lock(|| async {
                let mut tx = self.pool.inner().begin().await?;
                let expired: Vec<(String,)> =
                    sqlx::query_as("SELECT token FROM sessions WHERE expires_at <= ?")
                        .bind(&now)
                        .fetch_all(&mut *tx)
                        .await?;
                for (token,) in &expired {
                    sqlx::query("DELETE FROM session_permissions WHERE token = ?")
                        .bind(token)
                        .execute(&mut *tx)
                        .await?;
                }
                let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            })
            .await
    }
}
