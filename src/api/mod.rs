//! # HTTP Server
//!
//! Axum-based surface over the storage/geo/ingest/SSE subsystems: the
//! `/api/*` analytic and administrative routes, the live SSE stream, export
//! endpoints, and the unauthenticated `/health`, `/robots.txt`, `/metrics`
//! trio. [`ApiState`] is the single `Clone`-able handle threaded through
//! every handler via axum's `State` extractor.

pub mod auth;
pub mod cookies;
pub mod export;
pub mod middleware;
pub mod responses;
pub mod routes;
pub mod sites;
pub mod sse_handler;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::config::AppConfig;
use crate::database::Database;
use crate::geocache::GeoCache;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::sse::SseHub;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<Database>,
    pub geocache: Arc<GeoCache>,
    pub metrics: Arc<Metrics>,
    pub sse_hub: Arc<SseHub>,
    pub rate_limiter: Arc<RateLimiter>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    db: bool,
    version: &'static str,
}

async fn health(axum::extract::State(state): axum::extract::State<ApiState>) -> impl IntoResponse {
    let db_ok = state.db.health().await;
    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        axum::Json(HealthResponse {
            status: if db_ok { "ok" } else { "degraded" },
            db: db_ok,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn robots_txt() -> impl IntoResponse {
    ([(axum::http::header::CONTENT_TYPE, "text/plain")], "User-agent: *\nDisallow: /\n")
}

async fn metrics_endpoint(axum::extract::State(state): axum::extract::State<ApiState>) -> impl IntoResponse {
    if !state.config.metrics_enabled {
        return (StatusCode::NOT_FOUND, String::new());
    }
    (StatusCode::OK, state.metrics.render())
}

/// Assembles the full router: unauthenticated top-level routes plus the
/// `/api` tree from [`routes::api_router`], with the middleware stack from
/// [`middleware`] applied in §4.5's outer-to-inner order.
pub fn build_router(state: ApiState) -> Router {
    let top_level = Router::new()
        .route("/health", get(health))
        .route("/robots.txt", get(robots_txt))
        .route("/metrics", get(metrics_endpoint));

    let api = routes::api_router();

    // `.layer()` wraps the router built so far, so the LAST call here ends up
    // OUTERMOST on the request path. Registered in reverse so requests see
    // the §4.5 order 1→6: robots tag, security headers, CSRF, rate limit,
    // body cap, then dispatch with metrics.
    Router::new()
        .merge(top_level)
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::metrics_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::body_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::csrf_middleware))
        .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
        .layer(axum::middleware::from_fn(middleware::robots_tag_middleware))
        .with_state(state)
}
