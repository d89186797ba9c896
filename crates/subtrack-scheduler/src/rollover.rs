//! Rollover sweep — moves lapsed subscriptions into their next billing window.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use subtrack_core::error::{Result, TrackerError};
use subtrack_core::types::{DueSubscription, ErrorRecord};

use crate::background::catch_panic;
use crate::engine::SweepEngine;
use crate::pool::{JobQueue, WaitGroup};

#[derive(Debug, Clone)]
pub struct RolloverJob {
    pub subscription: DueSubscription,
}

impl RolloverJob {
    pub fn new(subscription: DueSubscription) -> Self {
        Self { subscription }
    }

    /// The next billing window: starts at the old end date and runs one period.
    pub fn next_window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let period = self.subscription.duration_category()?;
        let start = self.subscription.end_date;
        let end = period.advance(start).ok_or_else(|| {
            TrackerError::InvalidDuration(format!(
                "{} from {start} is out of range",
                self.subscription.duration
            ))
        })?;
        Ok((start, end))
    }
}

#[derive(Debug, Default)]
pub struct RolloverReport {
    /// Rows returned by the rollover query.
    pub selected: usize,
    /// Cancelled subscriptions left untouched.
    pub skipped: usize,
    pub updated: usize,
    pub errors: Vec<ErrorRecord>,
}

impl SweepEngine {
    /// Roll every lapsed, non-cancelled subscription forward one period.
    pub async fn run_rollover_sweep(&self) -> RolloverReport {
        tracing::info!("🔄 Rollover sweep started");
        let mut report = RolloverReport::default();

        let lapsed = match self.repo.subscriptions_needing_rollover().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("❌ Rollover query failed: {e}");
                report.errors.push(ErrorRecord::new(e));
                return report;
            }
        };
        report.selected = lapsed.len();

        let (cancelled, active): (Vec<_>, Vec<_>) =
            lapsed.into_iter().partition(|s| s.is_cancelled);
        report.skipped = cancelled.len();
        if active.is_empty() {
            tracing::info!("🔄 Rollover sweep done: nothing to roll");
            return report;
        }

        let pending = WaitGroup::new();
        pending.add(active.len());
        let updated = Arc::new(AtomicUsize::new(0));

        let (err_tx, mut err_rx) = mpsc::channel::<ErrorRecord>(self.rollover.workers.max(1));
        let collector = tokio::spawn(async move {
            let mut errors = Vec::new();
            while let Some(record) = err_rx.recv().await {
                tracing::warn!("⚠️ Rollover job failed: {record}");
                errors.push(record);
            }
            errors
        });

        let (job_tx, queue) = JobQueue::<RolloverJob>::bounded(self.rollover.queue_capacity);
        let mut workers = JoinSet::new();
        for worker in 0..self.rollover.workers {
            let engine = self.clone();
            let queue = queue.clone();
            let pending = pending.clone();
            let updated = updated.clone();
            let errors = err_tx.clone();
            workers.spawn(async move {
                tracing::debug!("rollover worker {worker} started");
                while let Some(job) = queue.next(&engine.shutdown).await {
                    let id = job.subscription.id;
                    match catch_panic(engine.roll_forward(&job)).await {
                        Ok(()) => {
                            updated.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            let _ = errors.send(ErrorRecord::new(e).for_subscription(id)).await;
                        }
                    }
                    pending.done();
                }
                tracing::debug!("rollover worker {worker} stopped");
            });
        }
        drop(err_tx);

        // Submitting runs in its own task so the wait below can start at once.
        // The task hands the sender back; the queue closes only after the wait.
        let shutdown = self.shutdown.clone();
        let submitter = tokio::spawn(async move {
            for subscription in active {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = job_tx.send(RolloverJob::new(subscription)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            job_tx
        });

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                tracing::info!("⏹️ Rollover sweep cancelled with {} job(s) outstanding", pending.count());
            }
            _ = pending.wait() => {}
        }

        let job_tx = submitter.await.ok();
        drop(job_tx);
        while workers.join_next().await.is_some() {}

        report.updated = updated.load(Ordering::Relaxed);
        report.errors = collector.await.unwrap_or_default();
        tracing::info!(
            "🔄 Rollover sweep done: {}/{} updated, {} error(s)",
            report.updated,
            report.selected - report.skipped,
            report.errors.len()
        );
        report
    }

    async fn roll_forward(&self, job: &RolloverJob) -> Result<()> {
        let (start, end) = job.next_window()?;
        self.repo.update_dates(job.subscription.id, start, end).await?;
        tracing::info!(
            "🔄 Rolled '{}' forward: {} → {}",
            job.subscription.name,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use subtrack_core::SubTrackConfig;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use crate::memory::InMemoryRepository;
    use crate::testing::{RecordingNotifier, lapsed_subscription};

    fn engine(repo: Arc<InMemoryRepository>, shutdown: CancellationToken) -> SweepEngine {
        let mut config = SubTrackConfig::default();
        config.rollover.workers = 2;
        config.rollover.queue_capacity = 1;
        SweepEngine::new(repo, Arc::new(RecordingNotifier::new()), &config, shutdown)
    }

    #[test]
    fn test_next_window_clamps_month_end() {
        let mut sub = lapsed_subscription(Uuid::new_v4(), "monthly");
        sub.end_date = Utc.with_ymd_and_hms(2025, 1, 31, 9, 30, 0).unwrap();
        let (start, end) = RolloverJob::new(sub).next_window().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 31, 9, 30, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 2, 28, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_next_window_rejects_unknown_duration() {
        let sub = lapsed_subscription(Uuid::new_v4(), "fortnightly");
        assert!(matches!(
            RolloverJob::new(sub).next_window(),
            Err(TrackerError::InvalidDuration(_))
        ));
    }

    #[tokio::test]
    async fn test_monthly_subscription_is_rolled_forward() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        let sub = lapsed_subscription(user, "monthly");
        let (id, old_end) = (sub.id, sub.end_date);
        repo.add_subscription(sub);

        let report = engine(repo.clone(), CancellationToken::new())
            .run_rollover_sweep()
            .await;

        assert_eq!(report.selected, 1);
        assert_eq!(report.updated, 1);
        assert!(report.errors.is_empty());
        let stored = repo.subscription(id).unwrap();
        assert_eq!(stored.start_date, old_end);
        assert_eq!(stored.end_date, old_end.checked_add_months(chrono::Months::new(1)).unwrap());
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_no_op() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        for period in ["weekly", "monthly", "6 months", "yearly"] {
            repo.add_subscription(lapsed_subscription(user, period));
        }
        let engine = engine(repo.clone(), CancellationToken::new());

        let first = engine.run_rollover_sweep().await;
        assert_eq!(first.updated, 4);

        let second = engine.run_rollover_sweep().await;
        assert_eq!(second.selected, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(repo.update_count(), 4);
    }

    #[tokio::test]
    async fn test_malformed_duration_only_fails_its_own_job() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        let bad = lapsed_subscription(user, "biweekly");
        let (bad_id, bad_end) = (bad.id, bad.end_date);
        repo.add_subscription(bad);
        for _ in 0..3 {
            repo.add_subscription(lapsed_subscription(user, "weekly"));
        }

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            engine(repo.clone(), CancellationToken::new()).run_rollover_sweep(),
        )
        .await
        .expect("a skipped job must still count down");

        assert_eq!(report.selected, 4);
        assert_eq!(report.updated, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].subscription_id, Some(bad_id));
        assert!(matches!(report.errors[0].error, TrackerError::InvalidDuration(_)));
        assert_eq!(repo.subscription(bad_id).unwrap().end_date, bad_end);
    }

    #[tokio::test]
    async fn test_single_worker_drains_every_job_before_queue_closes() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        for _ in 0..20 {
            repo.add_subscription(lapsed_subscription(user, "weekly"));
        }
        let mut config = SubTrackConfig::default();
        config.rollover.workers = 1;
        config.rollover.queue_capacity = 1;
        let engine = SweepEngine::new(
            repo.clone(),
            Arc::new(RecordingNotifier::new()),
            &config,
            CancellationToken::new(),
        );

        let report = tokio::time::timeout(Duration::from_secs(10), engine.run_rollover_sweep())
            .await
            .expect("wait group must be satisfied by the single worker");

        assert_eq!(report.updated, 20);
        assert_eq!(repo.update_count(), 20);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_is_left_alone() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        let mut sub = lapsed_subscription(user, "monthly");
        sub.is_cancelled = true;
        let (id, end) = (sub.id, sub.end_date);
        repo.add_subscription(sub);

        let report = engine(repo.clone(), CancellationToken::new())
            .run_rollover_sweep()
            .await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(repo.subscription(id).unwrap().end_date, end);
    }

    #[tokio::test]
    async fn test_subscription_lapsed_too_long_is_not_selected() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        let mut sub = lapsed_subscription(user, "monthly");
        sub.end_date = Utc::now() - TimeDelta::days(3);
        repo.add_subscription(sub);

        let report = engine(repo, CancellationToken::new()).run_rollover_sweep().await;
        assert_eq!(report.selected, 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_ends_sweep() {
        let repo = Arc::new(InMemoryRepository::new());
        let user = repo.add_user("a@example.com");
        for _ in 0..10 {
            repo.add_subscription(lapsed_subscription(user, "monthly"));
        }
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine(repo, shutdown).run_rollover_sweep(),
        )
        .await
        .expect("cancelled sweep must return");
        assert!(report.updated < 10);
    }
}
