//! # Retention / Session Janitor
//!
//! Background task that periodically expires sessions and old request
//! rows (§4.6), reusing the storage engine's retention and session-cleanup
//! primitives directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::database::Database;
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub interval: Duration,
    pub default_retention_days: u32,
    pub vacuum: bool,
}

pub struct Janitor {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Janitor {
    pub fn spawn(db: Arc<Database>, metrics: Arc<Metrics>, config: JanitorConfig) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.interval) => {
                        run_once(&db, &metrics, &config).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self { shutdown_tx, handle }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

async fn run_once(db: &Database, metrics: &Metrics, config: &JanitorConfig) {
    match db.cleanup_expired_sessions().await {
        Ok(count) => tracing::debug!(count, "janitor: expired sessions removed"),
        Err(err) => tracing::warn!(error = %err, "janitor: session cleanup failed"),
    }

    match db.cleanup_with_per_site_retention(config.default_retention_days).await {
        Ok(report) => {
            metrics.retention_deleted_rows_total.with_label_values(&["global"]).inc_by(report.global_deleted);
            for (_, deleted) in &report.per_site_deleted {
                metrics.retention_deleted_rows_total.with_label_values(&["site"]).inc_by(*deleted);
            }
            tracing::info!(
                global_deleted = report.global_deleted,
                sites = report.per_site_deleted.len(),
                "janitor: retention sweep complete"
            );
        }
        Err(err) => tracing::warn!(error = %err, "janitor: retention sweep failed"),
    }

    if config.vacuum {
        match db.vacuum().await {
            Ok(report) => tracing::info!(bytes_freed = report.bytes_freed, "janitor: vacuum complete"),
            Err(err) => tracing::warn!(error = %err, "janitor: vacuum failed"),
        }
    }
}
