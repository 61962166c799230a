//! Read-side analytics: the definitions in §4.1's "Analytics — key
//! definitions" subsection, implemented once here and reused by every
//! aggregate query so behavior can't drift between endpoints.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::Row;
use std::collections::HashMap;

use super::error::Result;
use super::requests::{format_ts, parse_ts};
use super::Database;

const ASSET_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "eot", "otf",
    "map", "json", "xml", "csv",
];

const BOT_SUBSTRINGS: &[&str] = &[
    "bot", "crawl", "spider", "crawler", "preview", "pingdom", "uptime",
];

const SEARCH_REFERRER_HOSTS: &[&str] =
    &["google.", "bing.", "yahoo.", "duckduckgo.", "baidu.", "yandex."];

static QUERY_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?.*$").unwrap());

/// A request's path is a "page" if, after stripping any query string, its
/// extension (if any) is not in the static-asset set.
pub fn is_page(path: &str) -> bool {
    let clean = QUERY_STRIP.replace(path, "");
    match clean.rsplit_once('.') {
        Some((_, ext)) => {
            let ext_lower = ext.to_ascii_lowercase();
            !ASSET_EXTENSIONS.iter().any(|a| ext_lower == *a || (*a == "woff" && ext_lower == "woff2"))
        }
        None => true,
    }
}

/// "Viewed" traffic excludes error statuses and common bot UA substrings.
pub fn is_viewed(status: i32, user_agent: &str) -> bool {
    if status >= 400 {
        return false;
    }
    let ua_lower = user_agent.to_ascii_lowercase();
    !BOT_SUBSTRINGS.iter().any(|s| ua_lower.contains(s))
}

/// Referrer classification: "direct" (empty), "search" (matches a known
/// search-engine host), or "external".
pub fn classify_referrer(referrer: &str) -> &'static str {
    if referrer.is_empty() {
        return "direct";
    }
    let host = referrer
        .split("://")
        .nth(1)
        .unwrap_or(referrer)
        .split('/')
        .next()
        .unwrap_or(referrer)
        .to_ascii_lowercase();
    if SEARCH_REFERRER_HOSTS.iter().any(|s| host.contains(s)) {
        "search"
    } else {
        "external"
    }
}

/// Bandwidth content-type classification by filename suffix.
pub fn classify_content_type(path: &str) -> &'static str {
    let clean = QUERY_STRIP.replace(path, "");
    let ext = clean.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "HTML",
        Some("css") => "CSS",
        Some("js" | "mjs") => "JavaScript",
        Some("json") => "JSON",
        Some("xml") => "XML",
        Some("png") => "PNG Image",
        Some("jpg" | "jpeg") => "JPEG Image",
        Some("gif") => "GIF Image",
        Some("svg") => "SVG Image",
        Some("webp") => "WebP Image",
        Some("ico") => "Icon",
        Some("woff" | "woff2" | "ttf" | "eot" | "otf") => "Web Font",
        Some("pdf") => "PDF",
        Some("zip" | "gz" | "tar" | "7z" | "rar") => "Archive",
        Some("mp4" | "webm" | "mov" | "avi") => "Video",
        Some("mp3" | "wav" | "ogg") => "Audio",
        None => "Page",
        _ => "Other",
    }
}

/// Nearest-rank percentile over a pre-sorted ascending slice.
fn nearest_rank(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total_requests: i64,
    pub status_2xx: i64,
    pub status_3xx: i64,
    pub status_4xx: i64,
    pub status_5xx: i64,
    pub bandwidth_bytes: i64,
    pub unique_visitors: i64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeseriesPoint {
    pub bucket_start: DateTime<Utc>,
    pub requests: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Count {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BandwidthEntry {
    pub content_type: String,
    pub bytes: i64,
    pub requests: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub key: String,
    pub requests: i64,
    pub bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitorSession {
    pub ip: String,
    pub user_agent: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_seconds: i64,
    pub page_views: i64,
    pub hits: i64,
    pub bandwidth_bytes: i64,
    pub entry_page: String,
    pub exit_page: String,
    pub is_bounce: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionsSummary {
    pub total_sessions: i64,
    pub sessions: Vec<VisitorSession>,
    pub sessions_by_hour_of_day: [i64; 24],
    pub top_entry_pages: Vec<Count>,
    pub top_exit_pages: Vec<Count>,
    pub avg_duration_seconds: f64,
    pub avg_page_views: f64,
    pub bounce_rate_percent: f64,
}

struct RawRow {
    ts: DateTime<Utc>,
    status: i32,
    bytes: i64,
    ip: String,
    user_agent: String,
    path: String,
    referrer: String,
    response_time_ms: f64,
}

impl Database {
    async fn fetch_range_rows(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Vec<RawRow>> {
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let since_str = format_ts(since);
                let rows = if let Some(host) = host {
                    sqlx::query(
                        "SELECT ts, status, bytes, ip, user_agent, path, referrer, response_time_ms
                         FROM requests WHERE ts >= ? AND host = ?",
                    )
                    .bind(&since_str)
                    .bind(host)
                    .fetch_all(self.pool.inner())
                    .await?
                } else {
                    sqlx::query(
                        "SELECT ts, status, bytes, ip, user_agent, path, referrer, response_time_ms
                         FROM requests WHERE ts >= ?",
                    )
                    .bind(&since_str)
                    .fetch_all(self.pool.inner())
                    .await?
                };
                Ok(rows)
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| RawRow {
                ts: parse_ts(row.get::<String, _>("ts").as_str()),
                status: row.get("status"),
                bytes: row.get("bytes"),
                ip: row.get("ip"),
                user_agent: row.get("user_agent"),
                path: row.get("path"),
                referrer: row.get("referrer"),
                response_time_ms: row.get("response_time_ms"),
            })
            .collect())
    }

    pub async fn summary(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Summary> {
        let rows = self.fetch_range_rows(host, since).await?;
        let mut summary = Summary::default();
        let mut visitors = std::collections::HashSet::new();
        let mut response_time_total = 0.0;
        let mut response_time_count = 0i64;

        for row in &rows {
            summary.total_requests += 1;
            summary.bandwidth_bytes += row.bytes;
            match row.status {
                200..=299 => summary.status_2xx += 1,
                300..=399 => summary.status_3xx += 1,
                400..=499 => summary.status_4xx += 1,
                500..=599 => summary.status_5xx += 1,
                _ => {}
            }
            visitors.insert(format!("{}|{}", row.ip, row.user_agent));
            if row.response_time_ms > 0.0 {
                response_time_total += row.response_time_ms;
                response_time_count += 1;
            }
        }
        summary.unique_visitors = visitors.len() as i64;
        summary.avg_response_time_ms = if response_time_count > 0 {
            response_time_total / response_time_count as f64
        } else {
            0.0
        };
        Ok(summary)
    }

    pub async fn timeseries(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Vec<TimeseriesPoint>> {
        let since_str = format_ts(since);
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let rows = if let Some(host) = host {
                    sqlx::query(
                        "SELECT bucket_start, SUM(requests) as requests, SUM(bytes) as bytes
                         FROM rollups_hourly WHERE bucket_start >= ? AND host = ?
                         GROUP BY bucket_start ORDER BY bucket_start ASC",
                    )
                    .bind(&since_str)
                    .bind(host)
                    .fetch_all(self.pool.inner())
                    .await?
                } else {
                    sqlx::query(
                        "SELECT bucket_start, SUM(requests) as requests, SUM(bytes) as bytes
                         FROM rollups_hourly WHERE bucket_start >= ?
                         GROUP BY bucket_start ORDER BY bucket_start ASC",
                    )
                    .bind(&since_str)
                    .fetch_all(self.pool.inner())
                    .await?
                };
                Ok(rows)
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| TimeseriesPoint {
                bucket_start: parse_ts(row.get::<String, _>("bucket_start").as_str()),
                requests: row.get::<Option<i64>, _>("requests").unwrap_or(0),
                bytes: row.get::<Option<i64>, _>("bytes").unwrap_or(0),
            })
            .collect())
    }

    async fn top_n(&self, host: Option<&str>, since: DateTime<Utc>, column: &str, limit: u32) -> Result<Vec<Count>> {
        let since_str = format_ts(since);
        let sql = format!(
            "SELECT {column} as key, COUNT(*) as count FROM requests WHERE ts >= ? {host_filter}
             GROUP BY {column} ORDER BY count DESC LIMIT ?",
            column = column,
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since_str);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                query = query.bind(limit as i64);
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| Count {
                key: row.get::<Option<String>, _>("key").unwrap_or_default(),
                count: row.get("count"),
            })
            .collect())
    }

    pub async fn top_paths(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        self.top_n(host, since, "path", limit).await
    }

    pub async fn top_hosts(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        self.top_n(None, since, "host", limit).await
    }

    pub async fn top_browsers(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        self.top_n(host, since, "browser", limit).await
    }

    pub async fn top_os(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        self.top_n(host, since, "os", limit).await
    }

    pub async fn top_bots(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        let since_str = format_ts(since);
        let sql = format!(
            "SELECT bot_name as key, COUNT(*) as count FROM requests WHERE ts >= ? AND is_bot = 1 {host_filter}
             GROUP BY bot_name ORDER BY count DESC LIMIT ?",
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since_str);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                query = query.bind(limit as i64);
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| Count {
                key: row.get::<Option<String>, _>("key").unwrap_or_default(),
                count: row.get("count"),
            })
            .collect())
    }

    pub async fn top_visitors(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        let rows = self.fetch_range_rows(host, since).await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in &rows {
            *counts.entry(row.ip.clone()).or_insert(0) += 1;
        }
        let mut list: Vec<Count> = counts.into_iter().map(|(key, count)| Count { key, count }).collect();
        list.sort_by(|a, b| b.count.cmp(&a.count));
        list.truncate(limit as usize);
        Ok(list)
    }

    pub async fn top_countries(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        let since_str = format_ts(since);
        let sql = format!(
            "SELECT COALESCE(country, 'unknown') as key, COUNT(*) as count FROM requests WHERE ts >= ? {host_filter}
             GROUP BY key ORDER BY count DESC LIMIT ?",
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since_str);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                query = query.bind(limit as i64);
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| Count {
                key: row.get::<Option<String>, _>("key").unwrap_or_default(),
                count: row.get("count"),
            })
            .collect())
    }

    /// Breakdown by individual HTTP status code, not just the 2xx/3xx/4xx/5xx
    /// classes `summary` reports.
    pub async fn status_breakdown(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Vec<Count>> {
        let since_str = format_ts(since);
        let sql = format!(
            "SELECT CAST(status AS TEXT) as key, COUNT(*) as count FROM requests WHERE ts >= ? {host_filter}
             GROUP BY status ORDER BY count DESC",
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since_str);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| Count {
                key: row.get::<Option<String>, _>("key").unwrap_or_default(),
                count: row.get("count"),
            })
            .collect())
    }

    pub async fn top_referrers(&self, host: Option<&str>, since: DateTime<Utc>, limit: u32) -> Result<Vec<Count>> {
        let rows = self.fetch_range_rows(host, since).await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in &rows {
            *counts.entry(classify_referrer(&row.referrer).to_string()).or_insert(0) += 1;
        }
        let mut list: Vec<Count> = counts.into_iter().map(|(key, count)| Count { key, count }).collect();
        list.sort_by(|a, b| b.count.cmp(&a.count));
        list.truncate(limit as usize);
        Ok(list)
    }

    /// Nearest-rank percentiles over rows with `response_time_ms > 0`.
    pub async fn performance_percentiles(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Percentiles> {
        let rows = self.fetch_range_rows(host, since).await?;
        let mut times: Vec<f64> = rows
            .iter()
            .map(|r| r.response_time_ms)
            .filter(|t| *t > 0.0)
            .collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap());

        if times.is_empty() {
            return Ok(Percentiles::default());
        }
        Ok(Percentiles {
            p50: nearest_rank(&times, 50.0),
            p90: nearest_rank(&times, 90.0),
            p95: nearest_rank(&times, 95.0),
            p99: nearest_rank(&times, 99.0),
            min: times[0],
            max: times[times.len() - 1],
            count: times.len() as i64,
        })
    }

    pub async fn bandwidth_breakdown(&self, host: Option<&str>, since: DateTime<Utc>) -> Result<Vec<BandwidthEntry>> {
        let rows = self.fetch_range_rows(host, since).await?;
        let mut agg: HashMap<&'static str, (i64, i64)> = HashMap::new();
        for row in &rows {
            let entry = agg.entry(classify_content_type(&row.path)).or_insert((0, 0));
            entry.0 += row.bytes;
            entry.1 += 1;
        }
        let mut list: Vec<BandwidthEntry> = agg
            .into_iter()
            .map(|(content_type, (bytes, requests))| BandwidthEntry {
                content_type: content_type.to_string(),
                bytes,
                requests,
            })
            .collect();
        list.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        Ok(list)
    }

    pub async fn monthly_history(&self, host: Option<&str>, months: u32) -> Result<Vec<HistoryPoint>> {
        let since = format_ts(Utc::now() - ChronoDuration::days(31 * months as i64));
        let sql = format!(
            "SELECT strftime('%Y-%m', ts) as key, COUNT(*) as requests, COALESCE(SUM(bytes), 0) as bytes
             FROM requests WHERE ts >= ? {host_filter}
             GROUP BY key ORDER BY key ASC",
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| HistoryPoint {
                key: row.get("key"),
                requests: row.get("requests"),
                bytes: row.get("bytes"),
            })
            .collect())
    }

    pub async fn daily_history(&self, host: Option<&str>, days: u32) -> Result<Vec<HistoryPoint>> {
        let since = format_ts(Utc::now() - ChronoDuration::days(days as i64));
        let sql = format!(
            "SELECT strftime('%Y-%m-%d', ts) as key, COUNT(*) as requests, COALESCE(SUM(bytes), 0) as bytes
             FROM requests WHERE ts >= ? {host_filter}
             GROUP BY key ORDER BY key ASC",
            host_filter = if host.is_some() { "AND host = ?" } else { "" },
        );
        let rows = self
            .pool
            .with_read_timeout(|| async {
                let mut query = sqlx::query(&sql).bind(&since);
                if let Some(h) = host {
                    query = query.bind(h);
                }
                Ok(query.fetch_all(self.pool.inner()).await?)
            })
            .await?;
        Ok(rows
            .iter()
            .map(|row| HistoryPoint {
                key: row.get("key"),
                requests: row.get("requests"),
                bytes: row.get("bytes"),
            })
            .collect())
    }

    /// Session reconstruction per §4.1: group by (ip, ua), order by
    /// timestamp, split on gaps exceeding `session_timeout`.
    pub async fn sessions(
        &self,
        host: Option<&str>,
        since: DateTime<Utc>,
        session_timeout: chrono::Duration,
    ) -> Result<SessionsSummary> {
        let mut rows = self.fetch_range_rows(host, since).await?;
        rows.sort_by(|a, b| {
            (a.ip.as_str(), a.user_agent.as_str(), a.ts).cmp(&(b.ip.as_str(), b.user_agent.as_str(), b.ts))
        });

        let mut sessions: Vec<VisitorSession> = Vec::new();
        let mut current: Option<(String, String, Vec<&RawRow>)> = None;

        let mut flush = |group: (String, String, Vec<&RawRow>), out: &mut Vec<VisitorSession>| {
            let (ip, ua, hits) = group;
            if hits.is_empty() {
                return;
            }
            let start = hits.first().unwrap().ts;
            let end = hits.last().unwrap().ts;
            let page_views = hits.iter().filter(|r| is_page(&r.path)).count() as i64;
            let bandwidth: i64 = hits.iter().map(|r| r.bytes).sum();
            let entry_page = hits
                .iter()
                .find(|r| is_page(&r.path))
                .map(|r| r.path.clone())
                .unwrap_or_default();
            let exit_page = hits
                .iter()
                .rev()
                .find(|r| is_page(&r.path))
                .map(|r| r.path.clone())
                .unwrap_or_default();
            out.push(VisitorSession {
                ip,
                user_agent: ua,
                start,
                end,
                duration_seconds: (end - start).num_seconds().max(0),
                page_views,
                hits: hits.len() as i64,
                bandwidth_bytes: bandwidth,
                entry_page,
                exit_page,
                is_bounce: page_views <= 1,
            });
        };

        for row in &rows {
            match &mut current {
                Some((ip, ua, hits)) if *ip == row.ip && *ua == row.user_agent => {
                    let gap = row.ts - hits.last().unwrap().ts;
                    if gap > session_timeout {
                        let finished = current.take().unwrap();
                        flush(finished, &mut sessions);
                        current = Some((row.ip.clone(), row.user_agent.clone(), vec![row]));
                    } else {
                        hits.push(row);
                    }
                }
                _ => {
                    if let Some(finished) = current.take() {
                        flush(finished, &mut sessions);
                    }
                    current = Some((row.ip.clone(), row.user_agent.clone(), vec![row]));
                }
            }
        }
        if let Some(finished) = current.take() {
            flush(finished, &mut sessions);
        }

        let mut by_hour = [0i64; 24];
        let mut entry_counts: HashMap<String, i64> = HashMap::new();
        let mut exit_counts: HashMap<String, i64> = HashMap::new();
        let mut duration_total = 0i64;
        let mut page_view_total = 0i64;
        let mut bounces = 0i64;

        for s in &sessions {
            by_hour[s.start.hour() as usize] += 1;
            if !s.entry_page.is_empty() {
                *entry_counts.entry(s.entry_page.clone()).or_insert(0) += 1;
            }
            if !s.exit_page.is_empty() {
                *exit_counts.entry(s.exit_page.clone()).or_insert(0) += 1;
            }
            duration_total += s.duration_seconds;
            page_view_total += s.page_views;
            if s.is_bounce {
                bounces += 1;
            }
        }

        let mut top_entry_pages: Vec<Count> = entry_counts.into_iter().map(|(key, count)| Count { key, count }).collect();
        top_entry_pages.sort_by(|a, b| b.count.cmp(&a.count));
        let mut top_exit_pages: Vec<Count> = exit_counts.into_iter().map(|(key, count)| Count { key, count }).collect();
        top_exit_pages.sort_by(|a, b| b.count.cmp(&a.count));

        let total = sessions.len() as i64;
        Ok(SessionsSummary {
            total_sessions: total,
            sessions,
            sessions_by_hour_of_day: by_hour,
            top_entry_pages,
            top_exit_pages,
            avg_duration_seconds: if total > 0 { duration_total as f64 / total as f64 } else { 0.0 },
            avg_page_views: if total > 0 { page_view_total as f64 / total as f64 } else { 0.0 },
            bounce_rate_percent: if total > 0 { (bounces as f64 / total as f64) * 100.0 } else { 0.0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::requests::RequestRecord;
    use crate::database::StorageConfig;
    use chrono::Duration;

    async fn test_db() -> Database {
        Database::open(&StorageConfig::in_memory()).await.unwrap()
    }

    fn record(host: &str, path: &str, status: i32, bytes: i64, ts: DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            timestamp: ts,
            host: host.to_string(),
            path: path.to_string(),
            status,
            bytes,
            ip: "1.1.1.1".to_string(),
            referrer: String::new(),
            user_agent: "U".to_string(),
            response_time_ms: 0.0,
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
        }
    }

    #[test]
    fn page_rule_strips_query_and_checks_asset_extensions() {
        assert!(is_page("/index.html?x=1"));
        assert!(!is_page("/app.js"));
        assert!(!is_page("/style.css?v=2"));
        assert!(is_page("/about"));
    }

    #[test]
    fn viewed_rule_excludes_errors_and_bot_substrings() {
        assert!(is_viewed(200, "Mozilla/5.0"));
        assert!(!is_viewed(404, "Mozilla/5.0"));
        assert!(!is_viewed(200, "Googlebot/2.1"));
    }

    #[test]
    fn referrer_classification() {
        assert_eq!(classify_referrer(""), "direct");
        assert_eq!(classify_referrer("https://www.google.com/search"), "search");
        assert_eq!(classify_referrer("https://example.com/"), "external");
    }

    #[tokio::test]
    async fn percentiles_match_nearest_rank_for_1_to_100() {
        let db = test_db().await;
        let now = Utc::now();
        for i in 1..=100 {
            let mut r = record("a.example", "/x", 200, 0, now);
            r.response_time_ms = i as f64;
            db.insert_request(&r).await.unwrap();
        }

        let p = db
            .performance_percentiles(Some("a.example"), now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(p.count, 100);
        assert_eq!(p.min, 1.0);
        assert_eq!(p.max, 100.0);
        assert!((p.p50 - 50.0).abs() <= 1.0);
        assert!((p.p95 - 95.0).abs() <= 1.0);
        assert!((p.p99 - 99.0).abs() <= 1.0);
    }

    // Scenario 6 (session reconstruction)
    #[tokio::test]
    async fn sessions_split_on_30_minute_gap() {
        let db = test_db().await;
        let t = Utc::now() - Duration::hours(1);
        for offset_min in [0, 5, 40, 45] {
            db.insert_request(&record("a.example", "/p", 200, 10, t + Duration::minutes(offset_min)))
                .await
                .unwrap();
        }

        let summary = db
            .sessions(Some("a.example"), t - Duration::minutes(1), Duration::seconds(1800))
            .await
            .unwrap();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.sessions[0].hits, 2);
        assert_eq!(summary.sessions[1].hits, 2);
    }
}
