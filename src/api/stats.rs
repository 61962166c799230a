//! # `/api/stats/*` — analytic read endpoints
//!
//! Thin query-parameter parsing in front of `database::analytics` and
//! `database::requests`; per-site authorization is checked before every
//! query that accepts a `host`.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::database::analytics::{BandwidthEntry, Count, Percentiles, SessionsSummary, Summary, TimeseriesPoint};
use crate::database::requests::StoredRequest;

use super::auth::check_site_access;
use super::responses::{since_from_range, ApiResult};
use super::ApiState;

const DEFAULT_TOP_N: u32 = 10;
const DEFAULT_MONTHS: u32 = 12;
const DEFAULT_DAYS: u32 = 30;
const DEFAULT_SESSION_TIMEOUT_SECS: i64 = 1800;

fn empty_host(host: &Option<String>) -> &str {
    host.as_deref().unwrap_or("")
}

fn host_filter(host: &Option<String>) -> Option<&str> {
    host.as_deref().filter(|h| !h.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub host: Option<String>,
    pub range: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeLimitQuery {
    pub host: Option<String>,
    pub range: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub host: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub host: Option<String>,
    pub months: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub host: Option<String>,
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub host: Option<String>,
    pub range: Option<String>,
    pub timeout: Option<i64>,
}

pub async fn summary(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Summary>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    Ok(Json(state.db.summary(host_filter(&q.host), since).await?))
}

pub async fn requests_timeseries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Vec<TimeseriesPoint>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    Ok(Json(state.db.timeseries(host_filter(&q.host), since).await?))
}

pub async fn geo(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_countries(host_filter(&q.host), since, limit).await?))
}

pub async fn hosts(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, "").await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_hosts(since, limit).await?))
}

pub async fn browsers(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_browsers(host_filter(&q.host), since, limit).await?))
}

pub async fn os(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_os(host_filter(&q.host), since, limit).await?))
}

pub async fn robots(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_bots(host_filter(&q.host), since, limit).await?))
}

pub async fn referrers(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_referrers(host_filter(&q.host), since, limit).await?))
}

pub async fn paths(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_paths(host_filter(&q.host), since, limit).await?))
}

pub async fn visitors(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeLimitQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let limit = q.limit.unwrap_or(DEFAULT_TOP_N);
    Ok(Json(state.db.top_visitors(host_filter(&q.host), since, limit).await?))
}

pub async fn recent(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RecentQuery>,
) -> ApiResult<Json<Vec<StoredRequest>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let limit = q.limit.unwrap_or(20).min(100);
    Ok(Json(state.db.recent_requests(host_filter(&q.host), limit).await?))
}

pub async fn monthly(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<MonthlyQuery>,
) -> ApiResult<Json<Vec<crate::database::analytics::HistoryPoint>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let months = q.months.unwrap_or(DEFAULT_MONTHS);
    Ok(Json(state.db.monthly_history(host_filter(&q.host), months).await?))
}

pub async fn daily(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<DailyQuery>,
) -> ApiResult<Json<Vec<crate::database::analytics::HistoryPoint>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let days = q.days.unwrap_or(DEFAULT_DAYS);
    Ok(Json(state.db.daily_history(host_filter(&q.host), days).await?))
}

pub async fn status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Vec<Count>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    Ok(Json(state.db.status_breakdown(host_filter(&q.host), since).await?))
}

pub async fn performance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Percentiles>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    Ok(Json(state.db.performance_percentiles(host_filter(&q.host), since).await?))
}

pub async fn bandwidth(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<Vec<BandwidthEntry>>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    Ok(Json(state.db.bandwidth_breakdown(host_filter(&q.host), since).await?))
}

pub async fn sessions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<SessionsQuery>,
) -> ApiResult<Json<SessionsSummary>> {
    check_site_access(&state, &headers, empty_host(&q.host)).await?;
    let since = since_from_range(q.range.as_deref());
    let timeout = chrono::Duration::seconds(q.timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS).max(1));
    Ok(Json(state.db.sessions(host_filter(&q.host), since, timeout).await?))
}
