//! Reminder sweep — threshold dispatcher plus reminder worker pool.
//!
//! Each horizon runs as its own task with its own bounded queue and pool.
//! Completions are counted in a separate task, concurrently with submission,
//! so queue capacity never bounds the number of jobs per horizon.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use subtrack_core::error::{Result, TrackerError};
use subtrack_core::types::{DueSubscription, ErrorRecord, Message, ReminderNotice, User};

use crate::background::catch_panic;
use crate::engine::SweepEngine;
use crate::pool::JobQueue;

/// A due subscription plus the horizon that selected it.
#[derive(Debug, Clone)]
pub struct ReminderJob {
    pub subscription: DueSubscription,
    pub horizon: u32,
}

impl ReminderJob {
    pub fn new(subscription: DueSubscription, horizon: u32) -> Self {
        Self { subscription, horizon }
    }

    pub fn message_for(&self, user: &User) -> Message {
        Message::Reminder(ReminderNotice {
            to: user.email.clone(),
            subscription_name: self.subscription.name.clone(),
            days_before: self.horizon,
            renewal_date: self.subscription.end_date,
        })
    }
}

/// Per-horizon accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HorizonReport {
    pub horizon: u32,
    /// Due subscriptions returned by the repository.
    pub selected: usize,
    /// Cancelled subscriptions left out of the queue.
    pub skipped: usize,
    pub submitted: usize,
    /// Completion signals observed; equals `submitted` unless cancelled.
    pub completed: usize,
}

#[derive(Debug, Default)]
pub struct ReminderReport {
    /// Ordered from the furthest horizon to the nearest.
    pub horizons: Vec<HorizonReport>,
    pub errors: Vec<ErrorRecord>,
}

impl ReminderReport {
    pub fn submitted(&self) -> usize {
        self.horizons.iter().map(|h| h.submitted).sum()
    }

    pub fn completed(&self) -> usize {
        self.horizons.iter().map(|h| h.completed).sum()
    }
}

impl SweepEngine {
    /// Remind owners of subscriptions renewing at each configured horizon.
    /// Best effort: job failures are collected, never fatal.
    pub async fn run_reminder_sweep(&self) -> ReminderReport {
        let horizons = self.reminders.horizons.clone();
        tracing::info!("📬 Reminder sweep started (horizons: {:?})", horizons);

        let (err_tx, mut err_rx) = mpsc::channel::<ErrorRecord>(horizons.len().max(1));
        let collector = tokio::spawn(async move {
            let mut errors = Vec::new();
            while let Some(record) = err_rx.recv().await {
                tracing::warn!("⚠️ Reminder job failed: {record}");
                errors.push(record);
            }
            errors
        });

        let mut pending = JoinSet::new();
        for horizon in horizons {
            let engine = self.clone();
            let errors = err_tx.clone();
            pending.spawn(async move { engine.run_horizon(horizon, errors).await });
        }
        drop(err_tx);

        let mut reports = Vec::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("❌ Horizon task failed: {e}"),
            }
        }
        reports.sort_by(|a, b| b.horizon.cmp(&a.horizon));

        let errors = collector.await.unwrap_or_default();
        let report = ReminderReport { horizons: reports, errors };
        tracing::info!(
            "📬 Reminder sweep done: {}/{} jobs completed, {} error(s)",
            report.completed(),
            report.submitted(),
            report.errors.len()
        );
        report
    }

    async fn run_horizon(&self, horizon: u32, errors: mpsc::Sender<ErrorRecord>) -> HorizonReport {
        let mut report = HorizonReport {
            horizon,
            ..HorizonReport::default()
        };

        let due = match self.repo.subscriptions_due_at(horizon).await {
            Ok(due) => due,
            Err(e) => {
                let _ = errors.send(ErrorRecord::new(e).at_horizon(horizon)).await;
                return report;
            }
        };
        report.selected = due.len();

        let (cancelled, active): (Vec<_>, Vec<_>) = due.into_iter().partition(|s| s.is_cancelled);
        report.skipped = cancelled.len();
        if active.is_empty() {
            tracing::debug!("[{horizon}d] nothing due");
            return report;
        }

        let expected = active.len();
        let capacity = self.reminders.queue_capacity;
        let (job_tx, queue) = JobQueue::bounded(capacity);
        let (done_tx, done_rx) = mpsc::channel::<()>(capacity.max(1));

        let mut workers = self.spawn_reminder_workers(horizon, queue, done_tx, errors);
        let counter = tokio::spawn(count_completions(done_rx, expected, self.shutdown.clone()));

        for subscription in active {
            let job = ReminderJob::new(subscription, horizon);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("⏹️ [{horizon}d] submission cancelled");
                    break;
                }
                sent = job_tx.send(job) => {
                    if sent.is_err() {
                        tracing::warn!("⚠️ [{horizon}d] job queue closed early");
                        break;
                    }
                    report.submitted += 1;
                }
            }
        }

        report.completed = counter.await.unwrap_or_default();
        drop(job_tx);
        while workers.join_next().await.is_some() {}

        tracing::debug!(
            "[{horizon}d] {}/{} reminders completed",
            report.completed,
            report.submitted
        );
        report
    }

    fn spawn_reminder_workers(
        &self,
        horizon: u32,
        queue: JobQueue<ReminderJob>,
        done: mpsc::Sender<()>,
        errors: mpsc::Sender<ErrorRecord>,
    ) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for worker in 0..self.reminders.workers {
            let engine = self.clone();
            let queue = queue.clone();
            let done = done.clone();
            let errors = errors.clone();
            workers.spawn(async move {
                tracing::debug!("[{horizon}d] reminder worker {worker} started");
                while let Some(job) = queue.next(&engine.shutdown).await {
                    let id = job.subscription.id;
                    let outcome = tokio::select! {
                        biased;
                        _ = engine.shutdown.cancelled() => Err(TrackerError::Cancelled),
                        r = catch_panic(engine.send_reminder(&job)) => r,
                    };
                    match outcome {
                        Ok(()) | Err(TrackerError::Cancelled) => {}
                        Err(e) => {
                            let record = ErrorRecord::new(e).for_subscription(id).at_horizon(horizon);
                            let _ = errors.send(record).await;
                        }
                    }
                    // Exactly one completion per job, whatever the outcome.
                    if done.send(()).await.is_err() {
                        break;
                    }
                }
                tracing::debug!("[{horizon}d] reminder worker {worker} stopped");
            });
        }
        workers
    }

    async fn send_reminder(&self, job: &ReminderJob) -> Result<()> {
        let user = self.repo.user_by_id(job.subscription.user_id).await?;
        let message = job.message_for(&user);
        self.notifier
            .send_with_retry(&message, self.reminders.max_send_attempts)
            .await?;
        tracing::info!(
            "📧 Reminder sent to {} for '{}' ({}d before renewal)",
            user.email,
            job.subscription.name,
            job.horizon
        );
        Ok(())
    }
}

/// Count completion signals until `expected` arrive, every sender is gone,
/// or shutdown fires.
async fn count_completions(
    mut done: mpsc::Receiver<()>,
    expected: usize,
    shutdown: CancellationToken,
) -> usize {
    let mut count = 0;
    while count < expected {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            signal = done.recv() => match signal {
                Some(()) => count += 1,
                None => break,
            },
        }
    }
    count
}
