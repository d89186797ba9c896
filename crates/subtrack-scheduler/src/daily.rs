//! Daily scheduler — sleeps until the next HH:MM and runs a workflow.
//!
//! The next trigger is recomputed from the wall clock after every run, so a
//! long workflow delays the following run but never skips it. Missed days
//! while the process was down are not caught up.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tokio::time::Instant;

use crate::background::{Background, panic_message};

/// Next instant at `hour:minute` strictly after `now`, in `now`'s time zone.
///
/// Returns `None` for an invalid time of day. A local time skipped by a DST
/// gap moves to the next day that has it; an ambiguous one uses the earlier
/// instant.
pub fn next_trigger<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let mut date = now.date_naive();

    for _ in 0..3 {
        let naive = date.and_hms_opt(hour, minute, 0)?;
        if let Some(target) = tz.from_local_datetime(&naive).earliest() {
            if target > *now {
                return Some(target);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Source of "how long until the next run".
pub trait Trigger: Send + Sync {
    fn delay_until_next(&self) -> Option<Duration>;
}

/// Fires once a day at a fixed local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    pub hour: u32,
    pub minute: u32,
}

impl DailyTrigger {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }
}

impl Trigger for DailyTrigger {
    fn delay_until_next(&self) -> Option<Duration> {
        let now = Local::now();
        let target = next_trigger(&now, self.hour, self.minute)?;
        (target - now).to_std().ok()
    }
}

/// Runs a workflow every time its trigger fires, until shutdown.
pub struct Scheduler<T> {
    trigger: T,
    background: Background,
}

impl<T: Trigger> Scheduler<T> {
    pub fn new(trigger: T, background: Background) -> Self {
        Self { trigger, background }
    }

    /// Loop forever: sleep until the trigger, then run `workflow` through
    /// the background supervisor and wait for it. A panicking run is logged
    /// and the loop carries on to the next trigger. Returns only when the
    /// shutdown token is cancelled (or the trigger cannot be computed).
    pub async fn run_daily<W, Fut>(&self, mut workflow: W)
    where
        W: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.background.shutdown_token();

        loop {
            let Some(delay) = self.trigger.delay_until_next() else {
                tracing::error!("❌ Could not compute next trigger time, scheduler stopped");
                return;
            };
            tracing::info!("⏰ Next sweep in {}", format_delay(delay));

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("⏹️ Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let started = Instant::now();
            let sweep = match std::panic::catch_unwind(AssertUnwindSafe(|| workflow())) {
                Ok(sweep) => sweep,
                Err(payload) => {
                    tracing::error!("💥 Daily sweep could not start: {}", panic_message(&*payload));
                    continue;
                }
            };
            match self.background.run("daily-sweep", sweep).await {
                Ok(Ok(())) => {
                    tracing::info!("✅ Daily sweep finished in {:?}", started.elapsed());
                }
                Ok(Err(e)) => {
                    tracing::warn!("⚠️ Daily sweep aborted: {e}");
                }
                Err(e) => {
                    tracing::error!("❌ Daily sweep task could not be joined: {e}");
                }
            }
        }
    }
}

fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 6, 30, 0).unwrap();
        let next = next_trigger(&now, 8, 0).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_already_passed_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let next = next_trigger(&now, 8, 0).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 11, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_exact_instant_is_not_after_now() {
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 8, 0, 0).unwrap();
        let next = next_trigger(&now, 8, 0).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_respects_offset() {
        let tz = FixedOffset::east_opt(7 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2025, 3, 10, 7, 59, 59).unwrap();
        let next = next_trigger(&now, 8, 0).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!((next - now).num_seconds(), 1);
    }

    #[test]
    fn test_invalid_time_of_day() {
        let now = Utc::now();
        assert!(next_trigger(&now, 24, 0).is_none());
        assert!(next_trigger(&now, 8, 60).is_none());
    }

    #[test]
    fn test_daily_trigger_delay_is_within_a_day() {
        let delay = DailyTrigger::new(8, 0).delay_until_next().unwrap();
        assert!(delay <= Duration::from_secs(25 * 3600));
    }

    struct EveryHour;

    impl Trigger for EveryHour {
        fn delay_until_next(&self) -> Option<Duration> {
            Some(Duration::from_secs(3600))
        }
    }

    async fn flaky_sweep(run: usize, background: Background) {
        if run == 0 {
            panic!("first sweep crashed");
        }
        // Second run stops the scheduler.
        background.shutdown_token().cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_workflow_does_not_stop_scheduler() {
        let background = Background::new();
        let scheduler = Scheduler::new(EveryHour, background.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let bg = background.clone();
        let started = Instant::now();
        tokio::time::timeout(
            Duration::from_secs(24 * 3600),
            scheduler.run_daily(move || {
                let run = counter.fetch_add(1, Ordering::SeqCst);
                flaky_sweep(run, bg.clone())
            }),
        )
        .await
        .expect("scheduler should stop after the second run");

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(2 * 3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_panicking_before_its_future_is_built() {
        let background = Background::new();
        let scheduler = Scheduler::new(EveryHour, background.clone());
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let bg = background.clone();
        tokio::time::timeout(
            Duration::from_secs(24 * 3600),
            scheduler.run_daily(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("could not build sweep");
                }
                let token = bg.shutdown_token();
                async move { token.cancel() }
            }),
        )
        .await
        .expect("scheduler should survive the first call and stop after the second");

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_sleeping() {
        let background = Background::new();
        let scheduler = Scheduler::new(EveryHour, background.clone());
        background.shutdown_token().cancel();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler
            .run_daily(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
