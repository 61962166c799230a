//! Per-file tailing state machine (§4.3). One task per configured path;
//! each advances independently and holds no lock on the others.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncSeekExt;
use tokio::sync::watch;

use crate::database::{Database, DatabaseError};
use crate::geocache::GeoCache;
use crate::metrics::Metrics;

use super::external::{GeoReader, LogLineParser, ParsedLine, UaClassifier};
use super::privacy::{self, PrivacyConfig};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TailStats {
    pub lines_ok: u64,
    pub lines_parse_error: u64,
    pub lines_insert_error: u64,
}

pub struct TailerConfig {
    pub poll_interval: Duration,
    pub success_threshold: i64,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            success_threshold: 10,
        }
    }
}

/// Owns one background task per tailed file. Dropping this value does not
/// stop the tasks — call [`Tailer::shutdown`] explicitly, then await the
/// join handles if a clean stop is required.
pub struct Tailer {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    lines_total: Arc<AtomicI64>,
}

impl Tailer {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        paths: Vec<String>,
        db: Arc<Database>,
        geocache: Arc<GeoCache>,
        parser: Arc<dyn LogLineParser>,
        classifier: Arc<dyn UaClassifier>,
        geo_reader: Arc<dyn GeoReader>,
        privacy: PrivacyConfig,
        metrics: Arc<Metrics>,
        config: TailerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let privacy = Arc::new(privacy);
        let lines_total = Arc::new(AtomicI64::new(0));
        let mut handles = Vec::with_capacity(paths.len());

        for path in paths {
            let db = Arc::clone(&db);
            let geocache = Arc::clone(&geocache);
            let parser = Arc::clone(&parser);
            let classifier = Arc::clone(&classifier);
            let geo_reader = Arc::clone(&geo_reader);
            let privacy = Arc::clone(&privacy);
            let metrics = Arc::clone(&metrics);
            let shutdown_rx = shutdown_rx.clone();
            let poll_interval = config.poll_interval;
            let success_threshold = config.success_threshold;
            let lines_total = Arc::clone(&lines_total);

            handles.push(tokio::spawn(async move {
                run_file_loop(
                    path,
                    db,
                    geocache,
                    parser,
                    classifier,
                    geo_reader,
                    privacy,
                    metrics,
                    poll_interval,
                    success_threshold,
                    shutdown_rx,
                    lines_total,
                )
                .await;
            }));
        }

        Self { shutdown_tx, handles, lines_total }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }

    pub fn lines_ingested(&self) -> i64 {
        self.lines_total.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_file_loop(
    path: String,
    db: Arc<Database>,
    geocache: Arc<GeoCache>,
    parser: Arc<dyn LogLineParser>,
    classifier: Arc<dyn UaClassifier>,
    geo_reader: Arc<dyn GeoReader>,
    privacy: Arc<PrivacyConfig>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
    success_threshold: i64,
    mut shutdown_rx: watch::Receiver<bool>,
    lines_total: Arc<AtomicI64>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match tail_once(
            &path,
            &db,
            &geocache,
            parser.as_ref(),
            classifier.as_ref(),
            geo_reader.as_ref(),
            &privacy,
            &metrics,
            success_threshold,
        )
        .await
        {
            Ok(stats) if stats.lines_ok + stats.lines_parse_error + stats.lines_insert_error > 0 => {
                lines_total.fetch_add(stats.lines_ok as i64, Ordering::Relaxed);
                tracing::debug!(path = %path, ok = stats.lines_ok, parse_errors = stats.lines_parse_error, insert_errors = stats.lines_insert_error, "tail cycle");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "tail cycle failed, retrying next poll");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// One poll cycle for a single file: stat, detect rotation, read complete
/// lines from the checkpointed offset, enrich, insert, checkpoint.
async fn tail_once(
    path: &str,
    db: &Database,
    geocache: &GeoCache,
    parser: &dyn LogLineParser,
    classifier: &dyn UaClassifier,
    geo_reader: &dyn GeoReader,
    privacy: &PrivacyConfig,
    metrics: &Metrics,
    success_threshold: i64,
) -> Result<TailStats, IngestError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TailStats::default());
        }
        Err(e) => return Err(e.into()),
    };
    let current_size = metadata.len() as i64;
    let current_mtime: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let progress = db.get_import_progress(path).await?;
    let (mut offset, stored_mtime) = match &progress {
        Some(p) => (p.byte_offset, p.mtime),
        None => (0, current_mtime),
    };

    // Shrinking below the stored offset, or a decreasing mtime, means the
    // file was rotated or truncated underneath us.
    if current_size < offset || current_mtime < stored_mtime {
        tracing::info!(path, old_offset = offset, new_size = current_size, "rotation detected, resetting to offset 0");
        offset = 0;
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset as u64)).await?;
    let mut reader = tokio::io::BufReader::new(file);

    let mut stats = TailStats::default();
    let mut consumed = offset;

    loop {
        let mut buf = Vec::new();
        let n = read_line_into(&mut reader, &mut buf).await?;
        if n == 0 {
            break;
        }
        if !buf.ends_with(b"\n") {
            // Incomplete trailing line: do not consume, wait for the next poll.
            break;
        }
        consumed += n as i64;
        metrics.ingest_bytes_total.with_label_values(&[path]).inc_by(n as u64);

        match parser.parse(&buf) {
            Ok(parsed) => {
                let record = enrich(parsed, geocache, classifier, geo_reader, privacy).await;
                match db.insert_request(&record).await {
                    Ok(_) => {
                        stats.lines_ok += 1;
                        metrics.ingest_lines_total.with_label_values(&[path, "ok"]).inc();
                        db.record_import_success(path, success_threshold).await?;
                    }
                    Err(e) => {
                        stats.lines_insert_error += 1;
                        metrics.ingest_lines_total.with_label_values(&[path, "insert_error"]).inc();
                        db.record_import_error(path, &e.to_string()).await?;
                    }
                }
            }
            Err(e) => {
                stats.lines_parse_error += 1;
                metrics.ingest_lines_total.with_label_values(&[path, "parse_error"]).inc();
                db.record_import_error(path, &e.to_string()).await?;
            }
        }

        db.set_import_progress(path, consumed, current_size, current_mtime).await?;
    }

    Ok(stats)
}

async fn read_line_into<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<usize> {
    use tokio::io::AsyncBufReadExt;
    reader.read_until(b'\n', buf).await
}

async fn enrich(
    parsed: ParsedLine,
    geocache: &GeoCache,
    classifier: &dyn UaClassifier,
    geo_reader: &dyn GeoReader,
    privacy: &PrivacyConfig,
) -> crate::database::RequestRecord {
    let ua = classifier.classify(&parsed.user_agent);

    let geo = match geocache.get(&parsed.ip) {
        Some(g) => g,
        None => {
            let looked_up = geo_reader.lookup(&parsed.ip).await;
            geocache.set(&parsed.ip, looked_up.clone());
            looked_up
        }
    };

    let ip = privacy::apply(&parsed.ip, privacy);

    crate::database::RequestRecord {
        timestamp: parsed.timestamp,
        host: parsed.host,
        path: parsed.path,
        status: parsed.status,
        bytes: parsed.bytes,
        ip,
        referrer: parsed.referrer,
        user_agent: parsed.user_agent,
        response_time_ms: parsed.response_time_ms,
        country: geo.country,
        region: geo.region,
        city: geo.city,
        browser: ua.browser,
        browser_version: ua.browser_version,
        os: ua.os,
        os_version: ua.os_version,
        device_type: ua.device_type,
        is_bot: ua.is_bot,
        bot_name: ua.bot_name,
        bot_intent: ua.bot_intent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StorageConfig;
    use crate::ingest::external::{JsonLineParser, NullGeoReader, SubstringUaClassifier};
    use std::io::Write;
    use tokio::io::AsyncWriteExt;

    async fn test_db() -> Database {
        Database::open(&StorageConfig::in_memory()).await.unwrap()
    }

    fn test_metrics() -> Metrics {
        Metrics::new().unwrap()
    }

    fn line(ts: &str, status: i32) -> String {
        format!(
            r#"{{"ts":"{ts}","host":"a.example","path":"/x","status":{status},"size":100,"remote_ip":"1.2.3.4","user_agent":"curl/8"}}"#
        ) + "\n"
    }

    #[tokio::test]
    async fn complete_lines_ingest_exactly_once_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(line("2025-01-01T00:00:00Z", 200).as_bytes()).unwrap();
            f.write_all(line("2025-01-01T00:00:01Z", 200).as_bytes()).unwrap();
        }

        let db = test_db().await;
        let path_str = path.to_str().unwrap();

        let geocache = GeoCache::new(100, Duration::from_secs(60));
        let parser = JsonLineParser;
        let classifier = SubstringUaClassifier;
        let geo_reader = NullGeoReader;
        let privacy = PrivacyConfig::default();
        let metrics = test_metrics();

        let first = tail_once(path_str, &db, &geocache, &parser, &classifier, &geo_reader, &privacy, &metrics, 10)
            .await
            .unwrap();
        assert_eq!(first.lines_ok, 2);

        // Simulate a restart: tail again with no new data appended.
        let second = tail_once(path_str, &db, &geocache, &parser, &classifier, &geo_reader, &privacy, &metrics, 10)
            .await
            .unwrap();
        assert_eq!(second.lines_ok, 0);

        let recent = db.recent_requests(Some("a.example"), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn incomplete_trailing_line_is_not_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        {
            let mut f = tokio::fs::File::create(&path).await.unwrap();
            f.write_all(line("2025-01-01T00:00:00Z", 200).as_bytes()).await.unwrap();
            f.write_all(br#"{"ts":"2025-01-01T00:00:02Z","host":"a.example""#).await.unwrap();
        }

        let db = test_db().await;
        let geocache = GeoCache::new(100, Duration::from_secs(60));
        let metrics = test_metrics();
        let stats = tail_once(
            path.to_str().unwrap(),
            &db,
            &geocache,
            &JsonLineParser,
            &SubstringUaClassifier,
            &NullGeoReader,
            &PrivacyConfig::default(),
            &metrics,
            10,
        )
        .await
        .unwrap();
        assert_eq!(stats.lines_ok, 1);

        let progress = db.get_import_progress(path.to_str().unwrap()).await.unwrap().unwrap();
        let line_len = line("2025-01-01T00:00:00Z", 200).len() as i64;
        assert_eq!(progress.byte_offset, line_len);
    }

    #[tokio::test]
    async fn shrinking_file_triggers_reread_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(line("2025-01-01T00:00:00Z", 200).as_bytes()).unwrap();
        }

        let db = test_db().await;
        let geocache = GeoCache::new(100, Duration::from_secs(60));
        let metrics = test_metrics();
        let path_str = path.to_str().unwrap();

        tail_once(path_str, &db, &geocache, &JsonLineParser, &SubstringUaClassifier, &NullGeoReader, &PrivacyConfig::default(), &metrics, 10)
            .await
            .unwrap();

        // Truncate and rewrite with fresh, shorter content.
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(line("2025-01-02T00:00:00Z", 404).as_bytes()).unwrap();
        }

        let stats = tail_once(path_str, &db, &geocache, &JsonLineParser, &SubstringUaClassifier, &NullGeoReader, &PrivacyConfig::default(), &metrics, 10)
            .await
            .unwrap();
        assert_eq!(stats.lines_ok, 1);

        let recent = db.recent_requests(Some("a.example"), 10).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}
