//! # `/api/sites` — per-host configuration CRUD
//!
//! Requires a valid session whenever auth is enabled, same as the stats
//! endpoints, but doesn't gate on `allowed_hosts`: managing sites is an
//! administrative action, not a dashboard view.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::database::sites::{Site, SiteWithActivity};

use super::auth::require_session;
use super::responses::ApiResult;
use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub host: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSiteRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SiteListResponse {
    pub sites: Vec<SiteWithActivity>,
}

pub async fn list(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Json<SiteListResponse>> {
    require_session(&state, &headers).await?;
    Ok(Json(SiteListResponse { sites: state.db.list_sites().await? }))
}

pub async fn create(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateSiteRequest>,
) -> ApiResult<(StatusCode, Json<Site>)> {
    require_session(&state, &headers).await?;
    let display_name = body.display_name.unwrap_or_else(|| body.host.clone());
    let retention_days = body.retention_days.unwrap_or(0);
    let site = state.db.create_site(&body.host, &display_name, retention_days, body.enabled).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

pub async fn get(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<Site>> {
    require_session(&state, &headers).await?;
    match state.db.get_site(id).await? {
        Some(site) => Ok(Json(site)),
        None => Err(crate::database::DatabaseError::SiteNotFound(id).into()),
    }
}

pub async fn update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateSiteRequest>,
) -> ApiResult<Json<Site>> {
    require_session(&state, &headers).await?;
    let existing = state.db.get_site(id).await?.ok_or(crate::database::DatabaseError::SiteNotFound(id))?;
    let display_name = body.display_name.unwrap_or(existing.display_name);
    let retention_days = body.retention_days.unwrap_or(existing.retention_days);
    let site = state.db.update_site(id, &display_name, retention_days, body.enabled).await?;
    Ok(Json(site))
}

pub async fn delete(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_session(&state, &headers).await?;
    state.db.delete_site(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
