//! # API Error Shape
//!
//! Every error response is `{"error", "code", "details?"}` (§6). Handlers
//! return `Result<_, ApiError>`; `ApiError` converts straight into that
//! shape via `IntoResponse`, the way the storage/ingest layers convert
//! their own errors into `thiserror` enums before crossing a module edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::database::DatabaseError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), details: None }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "invalid username or password")
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", "method not allowed")
    }

    pub fn csrf_invalid() -> Self {
        Self::new(StatusCode::FORBIDDEN, "CSRF_INVALID", "missing or mismatched CSRF token")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "rate limit exceeded")
    }

    pub fn request_too_large() -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "REQUEST_TOO_LARGE", "request body exceeds the configured limit")
    }

    pub fn site_access_denied() -> Self {
        Self::new(StatusCode::FORBIDDEN, "SITE_ACCESS_DENIED", "this session is not permitted to view that site")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn site_exists(host: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "SITE_EXISTS", format!("site already exists: {host}"))
    }

    pub fn missing_host() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MISSING_HOST", "the host query parameter is required")
    }

    pub fn invalid_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_ID", "id is not a valid identifier")
    }

    pub fn missing_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "MISSING_ID", "id path parameter is required")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn streaming_unsupported() -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, "STREAMING_UNSUPPORTED", "this export format cannot be streamed")
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ApiError {}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::SiteNotFound(id) => ApiError::not_found(format!("site not found: {id}")),
            DatabaseError::SiteExists(host) => ApiError::site_exists(&host),
            DatabaseError::ScheduleNotFound(id) => ApiError::not_found(format!("schedule not found: {id}")),
            DatabaseError::InvalidRetention(_) => ApiError::invalid_request(err.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.message, code: self.code, details: self.details };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Parses a duration query string per §4.5: an integer followed by a unit
/// suffix `s|m|h|d` (`d` means exactly 24h). Anything else is rejected so
/// callers can fall back to an endpoint-specific default.
pub fn parse_range(raw: &str) -> Option<chrono::Duration> {
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = raw.split_at(raw.len().saturating_sub(1));
    let value: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(value)),
        "m" => Some(chrono::Duration::minutes(value)),
        "h" => Some(chrono::Duration::hours(value)),
        "d" => Some(chrono::Duration::hours(value * 24)),
        _ => None,
    }
}

/// Resolves a `range` query value to a `since` timestamp, defaulting to
/// 24h on anything invalid or absent.
pub fn since_from_range(range: Option<&str>) -> chrono::DateTime<chrono::Utc> {
    let duration = range.and_then(parse_range).unwrap_or_else(|| chrono::Duration::hours(24));
    chrono::Utc::now() - duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_accepts_each_unit_suffix() {
        assert_eq!(parse_range("45s"), Some(chrono::Duration::seconds(45)));
        assert_eq!(parse_range("30m"), Some(chrono::Duration::minutes(30)));
        assert_eq!(parse_range("24h"), Some(chrono::Duration::hours(24)));
        assert_eq!(parse_range("7d"), Some(chrono::Duration::hours(168)));
    }

    #[test]
    fn parse_range_rejects_unknown_suffix_and_empty() {
        assert_eq!(parse_range("7w"), None);
        assert_eq!(parse_range(""), None);
    }

    #[test]
    fn since_from_range_falls_back_to_24h_default() {
        let since = since_from_range(Some("not-a-range"));
        let expected = chrono::Utc::now() - chrono::Duration::hours(24);
        assert!((since - expected).num_seconds().abs() < 2);
    }
}
