//! # `GET /api/sse` — live dashboard stream
//!
//! Subscribes to the process-wide [`SseHub`], pushes an initial snapshot
//! (summary + recent requests), then forwards hub events verbatim — except
//! that a non-`request` event triggers a fresh summary push rather than
//! forwarding the hub's own payload, per §4.5.2.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event as SseResponseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, StreamExt};

use crate::database::Database;
use crate::metrics::Metrics;

use super::auth::check_site_access;
use super::responses::{since_from_range, ApiError, ApiResult};
use super::stats::RangeQuery;
use super::ApiState;

const INITIAL_RECENT_LIMIT: u32 = 20;

fn to_response_event(event: crate::sse::Event) -> SseResponseEvent {
    let response_event = SseResponseEvent::default().data(event.payload);
    if event.event_type.is_empty() {
        response_event
    } else {
        response_event.event(event.event_type)
    }
}

pub async fn stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Response> {
    let host = q.host.clone().unwrap_or_default();
    check_site_access(&state, &headers, &host).await?;

    let Some((rx, subscription)) = state.sse_hub.subscribe() else {
        return Err(ApiError::service_unavailable("event stream is shutting down"));
    };
    state.metrics.sse_clients.inc();

    let host_filter = q.host.clone().filter(|h| !h.is_empty());
    let since = since_from_range(q.range.as_deref());

    let summary = state.db.summary(host_filter.as_deref(), since).await?;
    let recent = state.db.recent_requests(host_filter.as_deref(), INITIAL_RECENT_LIMIT).await?;

    let initial_summary = crate::sse::Event::json(&summary).map_err(|e| ApiError::internal(e.to_string()))?;
    let initial_recent =
        crate::sse::Event::json_named("recent", &recent).map_err(|e| ApiError::internal(e.to_string()))?;

    let db = Arc::clone(&state.db);
    let range = q.range.clone();

    let initial = stream::iter(vec![initial_summary, initial_recent]);
    let forwarded = stream::unfold((rx, db, host_filter, range), forward_next);

    let guard = SseGuard { metrics: Arc::clone(&state.metrics), _subscription: subscription };
    let body = initial.chain(forwarded).map(|event| Ok(to_response_event(event))).map(move |item| {
        let _keep_alive = &guard;
        item
    });

    let mut response = Sse::new(body).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response();
    response.headers_mut().insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(response)
}

type ForwardState = (tokio::sync::mpsc::Receiver<crate::sse::Event>, Arc<Database>, Option<String>, Option<String>);

/// Forwards `request` events verbatim; any other hub event re-fetches the
/// summary for this subscriber's host/range instead of passing the hub's
/// own payload through.
async fn forward_next(mut st: ForwardState) -> Option<(crate::sse::Event, ForwardState)> {
    loop {
        let event = st.0.recv().await?;
        if event.event_type == "request" {
            return Some((event, st));
        }

        let since = since_from_range(st.3.as_deref());
        let Ok(summary) = st.1.summary(st.2.as_deref(), since).await else { continue };
        let Ok(refreshed) = crate::sse::Event::json(&summary) else { continue };
        return Some((refreshed, st));
    }
}

struct SseGuard {
    metrics: Arc<Metrics>,
    _subscription: crate::sse::Subscription,
}

impl Drop for SseGuard {
    fn drop(&mut self) {
        self.metrics.sse_clients.dec();
    }
}
