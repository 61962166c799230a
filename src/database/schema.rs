//! Schema creation and tolerant evolution.
//!
//! Startup always runs the full `CREATE TABLE IF NOT EXISTS` set, then a
//! list of additive `ALTER TABLE` statements whose failures are ignored —
//! the same column may already exist from a prior version, and SQLite has
//! no `ADD COLUMN IF NOT EXISTS`.

use sqlx::SqlitePool;

use super::error::Result;

const CREATE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts TEXT NOT NULL,
        host TEXT NOT NULL,
        path TEXT NOT NULL,
        status INTEGER NOT NULL,
        bytes INTEGER NOT NULL DEFAULT 0,
        ip TEXT NOT NULL DEFAULT '',
        referrer TEXT NOT NULL DEFAULT '',
        user_agent TEXT NOT NULL DEFAULT '',
        response_time_ms REAL NOT NULL DEFAULT 0,
        country TEXT,
        region TEXT,
        city TEXT,
        browser TEXT,
        browser_version TEXT,
        os TEXT,
        os_version TEXT,
        device_type TEXT,
        is_bot INTEGER NOT NULL DEFAULT 0,
        bot_name TEXT,
        bot_intent TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollups_hourly (
        bucket_start TEXT NOT NULL,
        host TEXT NOT NULL,
        path TEXT NOT NULL,
        requests INTEGER NOT NULL DEFAULT 0,
        bytes INTEGER NOT NULL DEFAULT 0,
        status_2xx INTEGER NOT NULL DEFAULT 0,
        status_3xx INTEGER NOT NULL DEFAULT 0,
        status_4xx INTEGER NOT NULL DEFAULT 0,
        status_5xx INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (bucket_start, host, path)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rollups_daily (
        bucket_start TEXT NOT NULL,
        host TEXT NOT NULL,
        path TEXT NOT NULL,
        requests INTEGER NOT NULL DEFAULT 0,
        bytes INTEGER NOT NULL DEFAULT 0,
        status_2xx INTEGER NOT NULL DEFAULT 0,
        status_3xx INTEGER NOT NULL DEFAULT 0,
        status_4xx INTEGER NOT NULL DEFAULT 0,
        status_5xx INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (bucket_start, host, path)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS import_progress (
        path TEXT PRIMARY KEY,
        byte_offset INTEGER NOT NULL DEFAULT 0,
        file_size INTEGER NOT NULL DEFAULT 0,
        mtime TEXT NOT NULL DEFAULT '',
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS import_errors (
        path TEXT PRIMARY KEY,
        error_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT NOT NULL DEFAULT '',
        last_error_at TEXT,
        consecutive_successes INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS session_permissions (
        token TEXT PRIMARY KEY REFERENCES sessions(token),
        all_sites INTEGER NOT NULL DEFAULT 0,
        allowed_hosts TEXT NOT NULL DEFAULT '[]'
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL DEFAULT '',
        retention_days INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host TEXT NOT NULL DEFAULT '',
        report_type TEXT NOT NULL,
        format TEXT NOT NULL,
        period_start TEXT NOT NULL,
        period_end TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        file_name TEXT NOT NULL DEFAULT '',
        data BLOB NOT NULL,
        generated_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS report_schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        host TEXT NOT NULL DEFAULT '',
        schedule_type TEXT NOT NULL,
        send_day INTEGER NOT NULL DEFAULT 0,
        send_hour INTEGER NOT NULL DEFAULT 0,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        recipients TEXT NOT NULL DEFAULT '[]',
        format TEXT NOT NULL DEFAULT 'html',
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_at TEXT,
        next_run_at TEXT NOT NULL
    )"#,
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_requests_ts ON requests(ts)",
    "CREATE INDEX IF NOT EXISTS idx_requests_host ON requests(host)",
    "CREATE INDEX IF NOT EXISTS idx_requests_path ON requests(path)",
    "CREATE INDEX IF NOT EXISTS idx_requests_ip ON requests(ip)",
    "CREATE INDEX IF NOT EXISTS idx_requests_is_bot ON requests(is_bot)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_sites_host ON sites(host)",
    "CREATE INDEX IF NOT EXISTS idx_sites_enabled ON sites(enabled)",
    "CREATE INDEX IF NOT EXISTS idx_reports_generated_at ON reports(generated_at)",
    "CREATE INDEX IF NOT EXISTS idx_reports_host ON reports(host)",
    "CREATE INDEX IF NOT EXISTS idx_report_schedules_next_run_at ON report_schedules(next_run_at)",
];

/// Additive `ALTER TABLE` statements applied after table creation. Each one
/// is allowed to fail (column already exists) — failures are logged at
/// debug level and otherwise ignored, which is what keeps this function
/// idempotent across versions.
const ADDITIVE_ALTERS: &[&str] = &[
    "ALTER TABLE sites ADD COLUMN retention_days INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE requests ADD COLUMN bot_intent TEXT",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for stmt in CREATE_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in CREATE_INDEXES {
        sqlx::query(stmt).execute(pool).await?;
    }
    for stmt in ADDITIVE_ALTERS {
        if let Err(err) = sqlx::query(stmt).execute(pool).await {
            tracing::debug!(statement = stmt, error = %err, "ignoring additive alter failure");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();
        assert!(names.contains(&"requests".to_string()));
        assert!(names.contains(&"report_schedules".to_string()));
    }
}
