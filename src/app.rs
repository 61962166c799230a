//! # Application Wiring
//!
//! Owns the startup and shutdown sequence (§4.10/§5): config + logging,
//! storage, geo cache, ingest tailers, report runner, janitor, SSE hub,
//! then the HTTP server — torn down in the reverse order on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Instant;

use tokio::signal;

use crate::api::{self, ApiState};
use crate::config::AppConfig;
use crate::database::{Database, StorageConfig};
use crate::geocache::GeoCache;
use crate::ingest::external::{GeoReader, JsonLineParser, LogLineParser, NullGeoReader, SubstringUaClassifier, UaClassifier};
use crate::ingest::privacy::PrivacyConfig;
use crate::ingest::tailer::{Tailer, TailerConfig};
use crate::janitor::{Janitor, JanitorConfig};
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiterHandle;
use crate::reports::external::{BuiltinReportRenderer, Mailer, NullMailer, ReportRenderer, SmtpMailer};
use crate::reports::{ReportRunner, ReportRunnerConfig};
use crate::sse::SseHub;

/// Runs the service to completion: blocks until SIGINT/SIGTERM, then shuts
/// every subsystem down in reverse startup order.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    install_panic_hook();
    init_tracing(&config);
    tracing::info!(listen_addr = %config.listen_addr, "caddystat starting");

    let storage_config = StorageConfig {
        db_path: config.db_path.clone(),
        max_connections: config.db_max_connections,
        query_timeout: config.db_query_timeout,
        default_retention_days: config.data_retention_days,
        session_duration: config.session_duration,
    };
    let metrics = Arc::new(Metrics::new()?);
    let db = Arc::new(Database::open(&storage_config).await?.with_metrics(Arc::clone(&metrics)));

    let geocache = Arc::new(
        GeoCache::new(config.geo_cache_capacity as usize, config.geo_cache_ttl).with_metrics(Arc::clone(&metrics)),
    );
    let sse_hub = SseHub::new(config.sse_buffer_size as usize);
    sse_hub.set_metrics(Arc::clone(&metrics));
    let sse_hub_shutdown = Arc::clone(&sse_hub);
    let rate_limiter_handle = RateLimiterHandle::spawn(config.rate_limit_per_minute, std::time::Duration::from_secs(60));

    let privacy = PrivacyConfig {
        hash_ips: config.privacy_hash_ips,
        hash_salt: config.privacy_hash_salt.clone(),
        anonymize_last_octet: config.privacy_anonymize_last_octet,
    };

    if config.maxmind_db_path.is_some() {
        tracing::warn!("MAXMIND_DB_PATH is set but no MaxMind-backed GeoReader is wired up yet; geo enrichment is disabled");
    }
    let geo_reader: Arc<dyn GeoReader> = Arc::new(NullGeoReader);
    let parser: Arc<dyn LogLineParser> = Arc::new(JsonLineParser);
    let classifier: Arc<dyn UaClassifier> = Arc::new(SubstringUaClassifier);

    let tailer = (!config.log_paths.is_empty()).then(|| {
        Tailer::spawn(
            config.log_paths.clone(),
            Arc::clone(&db),
            Arc::clone(&geocache),
            Arc::clone(&parser),
            Arc::clone(&classifier),
            Arc::clone(&geo_reader),
            privacy,
            Arc::clone(&metrics),
            TailerConfig::default(),
        )
    });

    let renderer: Arc<dyn ReportRenderer> = Arc::new(BuiltinReportRenderer);
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(
            &smtp.host,
            smtp.port,
            smtp.username.as_deref(),
            smtp.password.as_deref(),
            &smtp.from,
        )?),
        None => Arc::new(NullMailer),
    };
    let report_runner = ReportRunner::spawn(
        Arc::clone(&db),
        renderer,
        mailer,
        Arc::clone(&metrics),
        ReportRunnerConfig { check_interval: config.report_check_interval },
    );

    let janitor = Janitor::spawn(
        Arc::clone(&db),
        Arc::clone(&metrics),
        JanitorConfig {
            interval: config.janitor_interval,
            default_retention_days: config.data_retention_days,
            vacuum: config.janitor_vacuum,
        },
    );

    let state = ApiState {
        db: Arc::clone(&db),
        geocache,
        metrics,
        sse_hub,
        rate_limiter: Arc::clone(&rate_limiter_handle.limiter),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    let router = api::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "HTTP server listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, shutting down subsystems");
    janitor.shutdown().await;
    report_runner.shutdown().await;
    if let Some(tailer) = tailer {
        tailer.shutdown();
        tailer.join().await;
    }
    let dropped_clients = sse_hub_shutdown.close();
    tracing::info!(dropped_clients, "sse hub closed");
    rate_limiter_handle.shutdown().await;

    tracing::info!("shutdown complete");
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("caddystat fatal error:");
        eprintln!("{}", panic_info);

        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));
}

fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log_format {
        crate::config::LogFormat::Json => subscriber.json().init(),
        crate::config::LogFormat::Text => subscriber.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
