//! # Scheduled-Report Runner
//!
//! Ticks on an interval, finds due schedules, renders and persists a
//! report for each, and emails it when SMTP is configured (§4.7).

pub mod external;
pub mod scheduler;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::database::reports::ScheduleType;
use crate::database::Database;
use crate::metrics::Metrics;
use external::{Mailer, ReportData, ReportRenderer};

pub struct ReportRunnerConfig {
    pub check_interval: Duration,
}

pub struct ReportRunner {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReportRunner {
    pub fn spawn(
        db: Arc<Database>,
        renderer: Arc<dyn ReportRenderer>,
        mailer: Arc<dyn Mailer>,
        metrics: Arc<Metrics>,
        config: ReportRunnerConfig,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.check_interval) => {
                        tick(&db, renderer.as_ref(), mailer.as_ref(), &metrics).await;
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

async fn tick(db: &Database, renderer: &dyn ReportRenderer, mailer: &dyn Mailer, metrics: &Metrics) {
    let now = Utc::now();
    let due = match db.get_due_report_schedules(now).await {
        Ok(schedules) => schedules,
        Err(err) => {
            tracing::warn!(error = %err, "report runner: failed to fetch due schedules");
            return;
        }
    };

    for schedule in due {
        let status = match run_schedule(db, renderer, mailer, &schedule, now).await {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(schedule_id = schedule.id, error = %err, "report runner: schedule failed");
                "error"
            }
        };
        metrics.report_runs_total.with_label_values(&[status]).inc();
    }
}

async fn run_schedule(
    db: &Database,
    renderer: &dyn ReportRenderer,
    mailer: &dyn Mailer,
    schedule: &crate::database::reports::ReportSchedule,
    now: chrono::DateTime<Utc>,
) -> Result<(), anyhow::Error> {
    let schedule_type = ScheduleType::parse(&schedule.schedule_type)
        .ok_or_else(|| anyhow::anyhow!("unknown schedule type: {}", schedule.schedule_type))?;
    let (period_start, period_end) = scheduler::compute_period(schedule_type, now);

    let summary = db.summary(Some(&schedule.host), period_start).await?;
    let top_paths = db.top_paths(Some(&schedule.host), period_start, 20).await?;
    let top_referrers = db.top_referrers(Some(&schedule.host), period_start, 10).await?;
    let bandwidth = db.bandwidth_breakdown(Some(&schedule.host), period_start).await?;

    let data = ReportData {
        host: schedule.host.clone(),
        period_start,
        period_end,
        summary,
        top_paths,
        top_referrers,
        bandwidth,
    };

    let rendered = renderer.render(&schedule.format, &data)?;
    db.create_report(
        &schedule.host,
        schedule_type.as_str(),
        &schedule.format,
        period_start,
        period_end,
        &rendered.file_name,
        rendered.bytes.clone(),
    )
    .await?;

    if !schedule.recipients.is_empty() {
        let subject = format!("{} report for {}", schedule_type.as_str(), schedule.host);
        let body = format!(
            "Report for {} covering {} to {}: {} requests.",
            schedule.host, data.period_start, data.period_end, data.summary.total_requests
        );
        mailer
            .send(&schedule.recipients, &subject, &body, (&rendered.file_name, rendered.mime_type, &rendered.bytes))
            .await?;
    }

    let timezone: Tz = Tz::from_str(&schedule.timezone).unwrap_or(chrono_tz::UTC);
    let next_run_at = scheduler::compute_next_run_at(schedule_type, schedule.send_day, schedule.send_hour, &timezone, now);
    db.update_schedule_run(schedule.id, now, next_run_at).await?;

    Ok(())
}
