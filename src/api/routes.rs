//! Assembles the `/api` router from each handler module. Kept separate from
//! [`super::build_router`] so the route table reads as one flat list.

use axum::routing::{get, post};
use axum::Router;

use super::{auth, export, sites, sse_handler, stats, ApiState};

pub fn api_router() -> Router<ApiState> {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/check", get(auth::check))
        .route("/stats/summary", get(stats::summary))
        .route("/stats/requests", get(stats::requests_timeseries))
        .route("/stats/geo", get(stats::geo))
        .route("/stats/hosts", get(stats::hosts))
        .route("/stats/browsers", get(stats::browsers))
        .route("/stats/os", get(stats::os))
        .route("/stats/robots", get(stats::robots))
        .route("/stats/referrers", get(stats::referrers))
        .route("/stats/paths", get(stats::paths))
        .route("/stats/visitors", get(stats::visitors))
        .route("/stats/recent", get(stats::recent))
        .route("/stats/monthly", get(stats::monthly))
        .route("/stats/daily", get(stats::daily))
        .route("/stats/status", get(stats::status))
        .route("/stats/performance", get(stats::performance))
        .route("/stats/bandwidth", get(stats::bandwidth))
        .route("/stats/sessions", get(stats::sessions))
        .route("/sse", get(sse_handler::stream))
        .route("/export/csv", get(export::export_csv))
        .route("/export/json", get(export::export_json))
        .route("/export/backup", get(export::export_backup))
        .route("/sites", get(sites::list).post(sites::create))
        .route("/sites/:id", get(sites::get).put(sites::update).delete(sites::delete))
}
