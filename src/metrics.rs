//! # Metrics
//!
//! Process-wide Prometheus registry and the metric handles each subsystem
//! is threaded (§11). `GET /metrics` renders the registry through
//! `prometheus::TextEncoder`; the route itself is registered or not by the
//! caller depending on `METRICS_ENABLED`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub ingest_lines_total: IntCounterVec,
    pub ingest_bytes_total: IntCounterVec,
    pub storage_write_duration_seconds: Histogram,
    pub geo_cache_hits_total: IntCounter,
    pub geo_cache_misses_total: IntCounter,
    pub geo_cache_evictions_total: IntCounter,
    pub sse_clients: IntGauge,
    pub sse_dropped_total: IntCounter,
    pub rate_limit_rejections_total: IntCounter,
    pub report_runs_total: IntCounterVec,
    pub retention_deleted_rows_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("caddystat_http_requests_total", "Total HTTP requests"),
            &["method", "route", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("caddystat_http_request_duration_seconds", "HTTP request latency"),
            &["method", "route"],
        )?;
        let ingest_lines_total = IntCounterVec::new(
            Opts::new("caddystat_ingest_lines_total", "Access-log lines processed"),
            &["file", "result"],
        )?;
        let ingest_bytes_total = IntCounterVec::new(
            Opts::new("caddystat_ingest_bytes_total", "Access-log bytes consumed"),
            &["file"],
        )?;
        let storage_write_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "caddystat_storage_write_duration_seconds",
            "Storage write latency",
        ))?;
        let geo_cache_hits_total = IntCounter::new("caddystat_geo_cache_hits_total", "Geo cache hits")?;
        let geo_cache_misses_total = IntCounter::new("caddystat_geo_cache_misses_total", "Geo cache misses")?;
        let geo_cache_evictions_total =
            IntCounter::new("caddystat_geo_cache_evictions_total", "Geo cache evictions")?;
        let sse_clients = IntGauge::new("caddystat_sse_clients", "Connected SSE clients")?;
        let sse_dropped_total = IntCounter::new("caddystat_sse_dropped_total", "SSE events dropped")?;
        let rate_limit_rejections_total =
            IntCounter::new("caddystat_rate_limit_rejections_total", "Requests rejected by the rate limiter")?;
        let report_runs_total = IntCounterVec::new(
            Opts::new("caddystat_report_runs_total", "Scheduled report runs"),
            &["status"],
        )?;
        let retention_deleted_rows_total = IntCounterVec::new(
            Opts::new("caddystat_retention_deleted_rows_total", "Rows deleted by retention sweeps"),
            &["scope"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(ingest_lines_total.clone()))?;
        registry.register(Box::new(ingest_bytes_total.clone()))?;
        registry.register(Box::new(storage_write_duration_seconds.clone()))?;
        registry.register(Box::new(geo_cache_hits_total.clone()))?;
        registry.register(Box::new(geo_cache_misses_total.clone()))?;
        registry.register(Box::new(geo_cache_evictions_total.clone()))?;
        registry.register(Box::new(sse_clients.clone()))?;
        registry.register(Box::new(sse_dropped_total.clone()))?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;
        registry.register(Box::new(report_runs_total.clone()))?;
        registry.register(Box::new(retention_deleted_rows_total.clone()))?;

        #[cfg(target_os = "linux")]
        {
            let process_collector = prometheus::process_collector::ProcessCollector::for_self();
            registry.register(Box::new(process_collector))?;
        }

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            ingest_lines_total,
            ingest_bytes_total,
            storage_write_duration_seconds,
            geo_cache_hits_total,
            geo_cache_misses_total,
            geo_cache_evictions_total,
            sse_clients,
            sse_dropped_total,
            rate_limit_rejections_total,
            report_runs_total,
            retention_deleted_rows_total,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).expect("prometheus encoding never fails for well-formed metrics");
        String::from_utf8(buffer).expect("prometheus text output is always valid utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.http_requests_total.with_label_values(&["GET", "/health", "200"]).inc();
        metrics.sse_clients.set(3);

        let rendered = metrics.render();
        assert!(rendered.contains("caddystat_http_requests_total"));
        assert!(rendered.contains("caddystat_sse_clients"));
    }

    #[test]
    fn counters_accumulate_across_labels_independently() {
        let metrics = Metrics::new().unwrap();
        metrics.ingest_lines_total.with_label_values(&["a.log", "ok"]).inc();
        metrics.ingest_lines_total.with_label_values(&["a.log", "parse_error"]).inc_by(2);

        assert_eq!(metrics.ingest_lines_total.with_label_values(&["a.log", "ok"]).get(), 1);
        assert_eq!(metrics.ingest_lines_total.with_label_values(&["a.log", "parse_error"]).get(), 2);
    }
}
