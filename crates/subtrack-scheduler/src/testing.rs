//! Test doubles shared by the sweep tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use subtrack_core::error::{Result, TrackerError};
use subtrack_core::traits::{Notifier, SubscriptionRepository};
use subtrack_core::types::{DueSubscription, Message, User};

/// A subscription whose end date sits inside the `days`-ahead due band.
pub(crate) fn subscription_due_in(user_id: Uuid, days: u32, duration: &str) -> DueSubscription {
    let end = Utc::now() + TimeDelta::days(i64::from(days)) - TimeDelta::hours(1);
    DueSubscription {
        id: Uuid::new_v4(),
        user_id,
        name: "Netflix subscription".to_string(),
        start_date: end - TimeDelta::days(30),
        end_date: end,
        duration: duration.to_string(),
        is_cancelled: false,
    }
}

/// A subscription that ended an hour ago.
pub(crate) fn lapsed_subscription(user_id: Uuid, duration: &str) -> DueSubscription {
    let mut sub = subscription_due_in(user_id, 0, duration);
    sub.start_date = sub.end_date - TimeDelta::days(7);
    sub
}

/// Records every send; can be told to fail, panic, or hang for chosen recipients.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
    attempts: AtomicUsize,
    fail_for: HashSet<String>,
    panic_for: HashSet<String>,
    hang: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_for(mut self, recipient: &str) -> Self {
        self.fail_for.insert(recipient.to_string());
        self
    }

    pub(crate) fn panicking_for(mut self, recipient: &str) -> Self {
        self.panic_for.insert(recipient.to_string());
        self
    }

    /// Every send blocks until cancelled.
    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let to = message.recipients().first().map(|r| r.to_string()).unwrap_or_default();
        if self.panic_for.contains(&to) {
            panic!("notifier exploded for {to}");
        }
        if self.fail_for.contains(&to) {
            return Err(TrackerError::SendFailed {
                attempts: 1,
                reason: format!("mailbox {to} unavailable"),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Panics on every call, outside any per-job barrier.
pub(crate) struct PanickingRepository;

#[async_trait]
impl SubscriptionRepository for PanickingRepository {
    async fn subscriptions_due_at(&self, _days: u32) -> Result<Vec<DueSubscription>> {
        panic!("repository unavailable");
    }

    async fn subscriptions_needing_rollover(&self) -> Result<Vec<DueSubscription>> {
        panic!("repository unavailable");
    }

    async fn user_by_id(&self, _id: Uuid) -> Result<User> {
        panic!("repository unavailable");
    }

    async fn update_dates(&self, _id: Uuid, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<()> {
        panic!("repository unavailable");
    }
}
