use thiserror::Error;

/// Errors surfaced by the storage engine to its callers.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("session not found or expired")]
    SessionNotFound,

    #[error("site not found: {0}")]
    SiteNotFound(i64),

    #[error("site already exists: {0}")]
    SiteExists(String),

    #[error("report schedule not found: {0}")]
    ScheduleNotFound(i64),

    #[error("invalid retention_days: {0} (negative values are rejected)")]
    InvalidRetention(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
