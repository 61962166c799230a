//! End-to-end HTTP surface tests: the full router (every middleware in
//! `api::middleware` plus real route handlers) driven with `tower::oneshot`
//! rather than individual handler functions, so the middleware stack itself
//! — CSRF, rate limiting, security headers, per-site authorization — is
//! exercised together the way a real client would see it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use caddystat::api::{self, ApiState};
use caddystat::config::{AppConfig, LogFormat};
use caddystat::database::{Database, StorageConfig};
use caddystat::geocache::GeoCache;
use caddystat::metrics::Metrics;
use caddystat::ratelimit::RateLimiter;
use caddystat::sse::SseHub;

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
        auth_username: None,
        auth_password: None,
        log_level: "error".to_string(),
        log_format: LogFormat::Text,
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
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute, Duration::from_secs(60))),
        config: Arc::new(config),
        started_at: Instant::now(),
    }
}

/// `rate_limit_middleware` extracts `ConnectInfo<SocketAddr>`, which only
/// exists on requests served through `into_make_service_with_connect_info`.
/// `tower::oneshot` bypasses that, so tests insert the extension directly,
/// the same way axum's own middleware tests do.
fn request(method: &str, uri: &str) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    req.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    req
}

fn request_with_body(method: &str, uri: &str, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    req
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn cookie_value(headers: &axum::http::HeaderMap, name: &str) -> Option<String> {
    headers.get_all(header::SET_COOKIE).iter().find_map(|v| {
        let raw = v.to_str().ok()?;
        let (pair, _) = raw.split_once(';')?;
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[tokio::test]
async fn health_endpoint_reports_ok_against_a_reachable_database() {
    let state = test_state(base_config()).await;
    let router = api::build_router(state);

    let response = router.oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], true);
}

#[tokio::test]
async fn robots_txt_disallows_everything() {
    let state = test_state(base_config()).await;
    let router = api::build_router(state);

    let response = router.oneshot(request("GET", "/robots.txt")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"User-agent: *\nDisallow: /\n");
}

#[tokio::test]
async fn every_response_carries_the_security_header_set() {
    let state = test_state(base_config()).await;
    let router = api::build_router(state);

    let response = router.oneshot(request("GET", "/health")).await.unwrap();
    let headers = response.headers();
    assert_eq!(headers.get("x-robots-tag").unwrap(), "noindex, nofollow");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("referrer-policy").unwrap(), "strict-origin-when-cross-origin");
    assert!(headers.get("content-security-policy").unwrap().to_str().unwrap().contains("frame-ancestors 'none'"));
}

/// P6: a state-changing request with no CSRF cookie/header is rejected;
/// the first response issues a cookie, and echoing it back as the header
/// on a second attempt succeeds.
#[tokio::test]
async fn csrf_double_submit_required_on_mutating_requests() {
    let mut config = base_config();
    config.auth_username = Some("admin".to_string());
    config.auth_password = Some("hunter2".to_string());
    let state = test_state(config).await;
    let router = api::build_router(state);

    let login_body = json!({"username": "admin", "password": "hunter2"});
    let first = router.clone().oneshot(request_with_body("POST", "/api/auth/login", login_body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::FORBIDDEN);
    let denied = json_body(first).await;
    assert_eq!(denied["code"], "CSRF_INVALID");

    // A bare GET still receives a csrf_token cookie even though it isn't
    // itself CSRF-protected.
    let priming = router.clone().oneshot(request("GET", "/health")).await.unwrap();
    let csrf_token = cookie_value(priming.headers(), "csrf_token").expect("csrf cookie set");

    let mut authed_login = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, format!("csrf_token={csrf_token}"))
        .header("x-csrf-token", csrf_token.clone())
        .body(Body::from(login_body.to_string()))
        .unwrap();
    authed_login.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));

    let success = router.oneshot(authed_login).await.unwrap();
    assert_eq!(success.status(), StatusCode::OK);
    let authed = success.headers().clone();
    assert!(cookie_value(&authed, "session").is_some());
    let body = json_body(success).await;
    assert_eq!(body["authenticated"], true);
}

/// Scenario 3 / P5: the third request within the window from the same
/// client IP is rejected with the exact documented body.
#[tokio::test]
async fn rate_limit_blocks_the_third_request_in_the_window() {
    let mut config = base_config();
    config.rate_limit_per_minute = 2;
    let state = test_state(config).await;
    let router = api::build_router(state);

    let first = router.clone().oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = router.clone().oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    let third = router.oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(third).await;
    assert_eq!(body, json!({"error": "rate limit exceeded", "code": "RATE_LIMITED"}));
}

/// Scenario 4: a session scoped to `a.example` may read its own summary,
/// is denied for an unrelated host, and may still read the aggregate
/// (empty-host) view.
#[tokio::test]
async fn site_permission_allows_own_host_denies_other_allows_aggregate() {
    let mut config = base_config();
    config.auth_username = Some("admin".to_string());
    config.auth_password = Some("hunter2".to_string());
    let state = test_state(config).await;

    let token = "integration-test-token".to_string();
    state.db.create_session(&token, Some(vec!["a.example".to_string()])).await.unwrap();

    let router = api::build_router(state);
    let session_cookie = format!("session={token}");

    let mut allowed = Request::builder()
        .uri("/api/stats/summary?host=a.example")
        .header(header::COOKIE, session_cookie.clone())
        .body(Body::empty())
        .unwrap();
    allowed.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    let response = router.clone().oneshot(allowed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut denied = Request::builder()
        .uri("/api/stats/summary?host=b.example")
        .header(header::COOKIE, session_cookie.clone())
        .body(Body::empty())
        .unwrap();
    denied.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    let response = router.clone().oneshot(denied).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], "SITE_ACCESS_DENIED");

    let mut aggregate = Request::builder()
        .uri("/api/stats/summary")
        .header(header::COOKIE, session_cookie)
        .body(Body::empty())
        .unwrap();
    aggregate.extensions_mut().insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 0))));
    let response = router.oneshot(aggregate).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Scenario 1: an inserted request row is immediately visible through
/// both the recent-requests and summary endpoints.
#[tokio::test]
async fn ingest_happy_path_is_visible_through_stats_endpoints() {
    let state = test_state(base_config()).await;

    let record = caddystat::database::RequestRecord {
        timestamp: chrono::Utc::now(),
        host: "a".to_string(),
        path: "/x".to_string(),
        status: 200,
        bytes: 100,
        ip: "1.2.3.4".to_string(),
        referrer: String::new(),
        user_agent: "curl/8".to_string(),
        response_time_ms: 12.0,
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
    };
    state.db.insert_request(&record).await.unwrap();

    let router = api::build_router(state);

    let recent = router.clone().oneshot(request("GET", "/api/stats/recent")).await.unwrap();
    assert_eq!(recent.status(), StatusCode::OK);
    let recent_body = json_body(recent).await;
    let rows = recent_body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["host"], "a");
    assert_eq!(rows[0]["path"], "/x");
    assert_eq!(rows[0]["status"], 200);

    let summary = router
        .oneshot(request("GET", "/api/stats/summary?range=24h&host=a"))
        .await
        .unwrap();
    assert_eq!(summary.status(), StatusCode::OK);
    let summary_body = json_body(summary).await;
    assert_eq!(summary_body["total_requests"], 1);
    assert_eq!(summary_body["status_2xx"], 1);
    assert_eq!(summary_body["bandwidth_bytes"], 100);
}

#[tokio::test]
async fn unauthenticated_request_is_rejected_when_auth_is_enabled() {
    let mut config = base_config();
    config.auth_username = Some("admin".to_string());
    config.auth_password = Some("hunter2".to_string());
    let state = test_state(config).await;
    let router = api::build_router(state);

    let response = router.oneshot(request("GET", "/api/stats/summary")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}
