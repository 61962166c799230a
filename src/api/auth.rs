//! # Authentication & Per-Site Authorization
//!
//! Single configured username/password (§4.5); sessions and their allowed-
//! host sets live in `database::sessions`, this module only issues tokens
//! and enforces them at the HTTP edge.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::database::{Session, SessionPermission};

use super::cookies::{self, CookieOpts};
use super::responses::{ApiError, ApiResult};
use super::ApiState;

const SESSION_COOKIE: &str = "session";

fn generate_session_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub allowed_sites: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub authenticated: bool,
}

pub async fn login(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> ApiResult<axum::response::Response> {
    let (expected_user, expected_pass) = match (&state.config.auth_username, &state.config.auth_password) {
        (Some(u), Some(p)) => (u, p),
        _ => return Err(ApiError::invalid_credentials()),
    };

    let user_ok = cookies::constant_time_eq(body.username.as_bytes(), expected_user.as_bytes());
    let pass_ok = cookies::constant_time_eq(body.password.as_bytes(), expected_pass.as_bytes());
    if !user_ok || !pass_ok {
        return Err(ApiError::invalid_credentials());
    }

    let token = generate_session_token();
    let session: Session = state.db.create_session(&token, body.allowed_sites).await?;

    let opts = CookieOpts {
        http_only: true,
        secure: cookies::is_https(&headers),
        same_site: "Strict",
        max_age_seconds: Some((session.expires_at - session.created_at).num_seconds().max(0) as u64),
    };

    let mut response = Json(LoginResponse { authenticated: true }).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookies::set_cookie_header(SESSION_COOKIE, &token, &opts));
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub authenticated: bool,
}

pub async fn logout(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<axum::response::Response> {
    if let Some(token) = cookies::get_cookie(&headers, SESSION_COOKIE) {
        state.db.delete_session(&token).await?;
    }

    let mut response = Json(LogoutResponse { authenticated: false }).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, cookies::clear_cookie_header(SESSION_COOKIE));
    Ok(response)
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub authenticated: bool,
    pub auth_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<SessionPermission>,
}

pub async fn check(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Json<CheckResponse>> {
    let auth_required = state.config.auth_enabled();
    if !auth_required {
        return Ok(Json(CheckResponse { authenticated: true, auth_required, permissions: None }));
    }

    let Some(token) = cookies::get_cookie(&headers, SESSION_COOKIE) else {
        return Ok(Json(CheckResponse { authenticated: false, auth_required, permissions: None }));
    };

    match state.db.get_session(&token).await? {
        Some(_) => {
            let permissions = state.db.get_session_permission(&token).await?;
            Ok(Json(CheckResponse { authenticated: true, auth_required, permissions }))
        }
        None => Ok(Json(CheckResponse { authenticated: false, auth_required, permissions: None })),
    }
}

/// Resolves the calling session's permission set, or a permit-all stand-in
/// when auth is disabled. Used by every handler that accepts a `host`
/// query parameter, plus the SSE endpoint.
pub async fn require_session(state: &ApiState, headers: &HeaderMap) -> ApiResult<SessionPermission> {
    if !state.config.auth_enabled() {
        return Ok(SessionPermission { token: String::new(), all_sites: true, allowed_hosts: Vec::new() });
    }

    let token = cookies::get_cookie(headers, SESSION_COOKIE).ok_or_else(|| ApiError::unauthorized("login required"))?;
    if state.db.get_session(&token).await?.is_none() {
        return Err(ApiError::unauthorized("session expired or invalid"));
    }
    Ok(state.db.get_session_permission(&token).await?.unwrap_or(SessionPermission {
        token,
        all_sites: false,
        allowed_hosts: Vec::new(),
    }))
}

/// §4.5 per-site authorization: non-empty `host` must be covered by the
/// session's permission set; empty `host` (aggregate view) always passes.
pub async fn check_site_access(state: &ApiState, headers: &HeaderMap, host: &str) -> ApiResult<()> {
    let permission = require_session(state, headers).await?;
    if host.is_empty() {
        return Ok(());
    }
    if permission.all_sites || permission.allowed_hosts.iter().any(|h| h == host) {
        Ok(())
    } else {
        Err(ApiError::site_access_denied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::database::{Database, StorageConfig};
    use crate::geocache::GeoCache;
    use crate::metrics::Metrics;
    use crate::ratelimit::RateLimiter;
    use crate::sse::SseHub;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn base_config() -> AppConfig {
        AppConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            db_path: String::new(),
            log_paths: Vec::new(),
            data_retention_days: 90,
            maxmind_db_path: None,
            privacy_hash_ips: false,
            privacy_hash_salt: String::new(),
            privacy_anonymize_last_octet: false,
            raw_retention_hours: 0,
            aggregation_interval: Duration::from_secs(3600),
            auth_username: Some("admin".to_string()),
            auth_password: Some("hunter2".to_string()),
            log_level: "info".to_string(),
            log_format: crate::config::LogFormat::Text,
            rate_limit_per_minute: 0,
            max_request_body_bytes: 1_048_576,
            db_max_connections: 1,
            db_query_timeout: Duration::from_secs(10),
            session_duration: Duration::from_secs(3600),
            geo_cache_capacity: 100,
            geo_cache_ttl: Duration::from_secs(60),
            sse_buffer_size: 10,
            janitor_interval: Duration::from_secs(3600),
            janitor_vacuum: false,
            report_check_interval: Duration::from_secs(300),
            smtp: None,
            metrics_enabled: true,
        }
    }

    async fn test_state(config: AppConfig) -> ApiState {
        ApiState {
            db: Arc::new(Database::open(&StorageConfig::in_memory()).await.unwrap()),
            geocache: Arc::new(GeoCache::new(100, Duration::from_secs(60))),
            metrics: Arc::new(Metrics::new().unwrap()),
            sse_hub: SseHub::new(10),
            rate_limiter: Arc::new(RateLimiter::new(0, Duration::from_secs(60))),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn site_access_denied_without_permission_and_allowed_for_granted_host() {
        let state = test_state(base_config()).await;
        let token = "tok-1".to_string();
        state.db.create_session(&token, Some(vec!["a.example".to_string()])).await.unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, format!("session={token}").parse().unwrap());

        assert!(check_site_access(&state, &headers, "a.example").await.is_ok());
        assert!(check_site_access(&state, &headers, "b.example").await.is_err());
        assert!(check_site_access(&state, &headers, "").await.is_ok());
    }

    #[tokio::test]
    async fn auth_disabled_permits_everything() {
        let mut config = base_config();
        config.auth_username = None;
        config.auth_password = None;
        let state = test_state(config).await;

        assert!(check_site_access(&state, &HeaderMap::new(), "anything.example").await.is_ok());
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized_when_auth_enabled() {
        let state = test_state(base_config()).await;
        assert!(check_site_access(&state, &HeaderMap::new(), "").await.is_err());
    }
}
