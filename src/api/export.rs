//! # `GET /api/export/{csv,json,backup}` (§4.5.3)
//!
//! CSV and JSON are streamed in batches via `Database::stream_requests`
//! rather than buffered whole; the raw backup is a best-effort file copy,
//! documented to operators as not strictly WAL-consistent.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::database::requests::StoredRequest;

use super::auth::check_site_access;
use super::responses::{since_from_range, ApiError, ApiResult};
use super::ApiState;

const STREAM_BATCH_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub host: Option<String>,
    pub range: Option<String>,
}

fn host_filter(host: &Option<String>) -> Option<&str> {
    host.as_deref().filter(|h| !h.is_empty())
}

pub async fn export_csv(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<ExportQuery>,
) -> ApiResult<Response> {
    check_site_access(&state, &headers, q.host.as_deref().unwrap_or("")).await?;
    let host = host_filter(&q.host).map(str::to_string);
    let since = q.range.as_deref().and(Some(since_from_range(q.range.as_deref())));

    let (tx, rx) = mpsc::unbounded_channel::<std::io::Result<bytes::Bytes>>();
    let db = state.db.clone();

    tokio::spawn(async move {
        if tx.send(Ok(bytes::Bytes::from_static(CSV_HEADER.as_bytes()))).is_err() {
            return;
        }

        let result = db
            .stream_requests(host.as_deref(), since, STREAM_BATCH_SIZE, |batch| {
                let buf = match encode_csv_batch(batch) {
                    Ok(buf) => buf,
                    Err(err) => return Err(crate::database::DatabaseError::Pool(err.to_string())),
                };
                if tx.send(Ok(bytes::Bytes::from(buf))).is_err() {
                    return Err(crate::database::DatabaseError::Pool("client disconnected".to_string()));
                }
                Ok(())
            })
            .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, "csv export: stream_requests failed");
        }
    });

    let body = Body::from_stream(tokio_stream::wrappers::UnboundedReceiverStream::new(rx));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv")),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"export.csv\"")),
        ],
        body,
    )
        .into_response())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: i64,
    timestamp: String,
    host: &'a str,
    path: &'a str,
    status: i32,
    bytes: i64,
    ip: &'a str,
    referrer: &'a str,
    user_agent: &'a str,
    response_time_ms: f64,
    country: &'a str,
    browser: &'a str,
    os: &'a str,
    is_bot: bool,
}

fn encode_csv_batch(batch: &[StoredRequest]) -> csv::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    for row in batch {
        let r = &row.record;
        writer.serialize(CsvRow {
            id: row.id,
            timestamp: r.timestamp.to_rfc3339(),
            host: &r.host,
            path: &r.path,
            status: r.status,
            bytes: r.bytes,
            ip: &r.ip,
            referrer: &r.referrer,
            user_agent: &r.user_agent,
            response_time_ms: r.response_time_ms,
            country: r.country.as_deref().unwrap_or(""),
            browser: r.browser.as_deref().unwrap_or(""),
            os: r.os.as_deref().unwrap_or(""),
            is_bot: r.is_bot,
        })?;
    }
    writer.into_inner().map_err(|e| e.into_error())
}

const CSV_HEADER: &str =
    "id,timestamp,host,path,status,bytes,ip,referrer,user_agent,response_time_ms,country,browser,os,is_bot\n";

pub async fn export_json(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<ExportQuery>,
) -> ApiResult<Response> {
    check_site_access(&state, &headers, q.host.as_deref().unwrap_or("")).await?;
    let host = host_filter(&q.host).map(str::to_string);
    let since = q.range.as_deref().and(Some(since_from_range(q.range.as_deref())));

    let (tx, rx) = mpsc::unbounded_channel::<std::io::Result<bytes::Bytes>>();
    let db = state.db.clone();

    tokio::spawn(async move {
        if tx.send(Ok(bytes::Bytes::from_static(b"["))).is_err() {
            return;
        }
        let mut first = true;

        let result = db
            .stream_requests(host.as_deref(), since, STREAM_BATCH_SIZE, |batch| {
                let mut buf = Vec::new();
                for row in batch {
                    if !first {
                        buf.push(b',');
                    }
                    first = false;
                    buf.push(b'\n');
                    if let Ok(bytes) = serde_json::to_vec(row) {
                        buf.extend_from_slice(&bytes);
                    }
                }
                if tx.send(Ok(bytes::Bytes::from(buf))).is_err() {
                    return Err(crate::database::DatabaseError::Pool("client disconnected".to_string()));
                }
                Ok(())
            })
            .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, "json export: stream_requests failed");
        }
        let _ = tx.send(Ok(bytes::Bytes::from_static(b"\n]")));
    });

    let body = Body::from_stream(tokio_stream::wrappers::UnboundedReceiverStream::new(rx));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"export.json\"")),
        ],
        body,
    )
        .into_response())
}

/// Raw backup: a best-effort copy of the SQLite file. Not consistent under
/// concurrent writes beyond whatever guarantee SQLite's WAL mode offers a
/// reader mid-copy — documented to operators, not strengthened here.
pub async fn export_backup(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Response> {
    check_site_access(&state, &headers, "").await?;

    let path = state.config.db_path.clone();
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::service_unavailable(format!("backup unavailable: {e}")))?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, HeaderValue::from_static("attachment; filename=\"caddystat-backup.db\"")),
        ],
        body,
    )
        .into_response())
}
