//! Sweep engine — owns the gateways and configuration the daily sweeps use.
//! The sweeps themselves live in `reminder` and `rollover`.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use subtrack_core::config::{ReminderConfig, RolloverConfig, SubTrackConfig, SweepKind};
use subtrack_core::error::{Result, TrackerError};
use subtrack_core::traits::{Notifier, SubscriptionRepository};

use crate::background::Background;
use crate::reminder::ReminderReport;
use crate::rollover::RolloverReport;

/// Cheap to clone: gateways are shared, config is copied once at startup.
#[derive(Clone)]
pub struct SweepEngine {
    pub(crate) repo: Arc<dyn SubscriptionRepository>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) reminders: ReminderConfig,
    pub(crate) rollover: RolloverConfig,
    sweeps: Vec<SweepKind>,
    pub(crate) shutdown: CancellationToken,
}

/// Outcome of one daily run.
#[derive(Debug, Default)]
pub struct DailyReport {
    pub reminders: Option<ReminderReport>,
    pub rollover: Option<RolloverReport>,
}

impl DailyReport {
    pub fn error_count(&self) -> usize {
        self.reminders.as_ref().map_or(0, |r| r.errors.len())
            + self.rollover.as_ref().map_or(0, |r| r.errors.len())
    }
}

impl SweepEngine {
    pub fn new(
        repo: Arc<dyn SubscriptionRepository>,
        notifier: Arc<dyn Notifier>,
        config: &SubTrackConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repo,
            notifier,
            reminders: config.reminders.clone(),
            rollover: config.rollover.clone(),
            sweeps: config.scheduler.sweeps.clone(),
            shutdown,
        }
    }

    pub fn sweeps(&self) -> &[SweepKind] {
        &self.sweeps
    }

    /// Run one sweep of the given kind.
    pub async fn run(&self, kind: SweepKind, report: &mut DailyReport) {
        if self.shutdown.is_cancelled() {
            tracing::info!("⏹️ Skipping {kind} sweep: shutting down");
            return;
        }
        match kind {
            SweepKind::Reminders => report.reminders = Some(self.run_reminder_sweep().await),
            SweepKind::Rollover => report.rollover = Some(self.run_rollover_sweep().await),
        }
    }

    /// Run every configured sweep, in configuration order.
    pub async fn run_daily_sweeps(&self) -> DailyReport {
        let mut report = DailyReport::default();
        for kind in self.sweeps.clone() {
            self.run(kind, &mut report).await;
        }
        if report.error_count() > 0 {
            tracing::warn!("⚠️ Daily sweeps finished with {} error(s)", report.error_count());
        }
        report
    }

    /// Run `sweeps` once as a supervised background task and hand back the report.
    /// A panic anywhere in the run comes back as `TrackerError::Panic`.
    pub async fn run_once(&self, background: &Background, sweeps: Vec<SweepKind>) -> Result<DailyReport> {
        let (report_tx, report_rx) = oneshot::channel();
        let engine = self.clone();
        let handle = background.run("run-now", async move {
            let mut report = DailyReport::default();
            for kind in sweeps {
                engine.run(kind, &mut report).await;
            }
            let _ = report_tx.send(report);
        });

        match handle.await {
            Ok(result) => result?,
            Err(e) => return Err(TrackerError::Panic(format!("run-now task could not be joined: {e}"))),
        }
        report_rx.await.map_err(|_| TrackerError::Cancelled)
    }
}
