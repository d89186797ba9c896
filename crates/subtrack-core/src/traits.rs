//! Gateway traits — the only contracts the job engine depends on.
//! Implementations live in `subtrack-db`, `subtrack-mailer`, and the
//! scheduler's in-memory repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::types::{DueSubscription, Message, User};

/// Read/write access to subscriptions and their owners.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Subscriptions whose end date falls in the due band `days` from now.
    async fn subscriptions_due_at(&self, days: u32) -> Result<Vec<DueSubscription>>;

    /// Subscriptions whose billing window has lapsed (due band at "now").
    async fn subscriptions_needing_rollover(&self) -> Result<Vec<DueSubscription>>;

    /// Fails with `TrackerError::NotFound` when the user does not exist.
    async fn user_by_id(&self, id: Uuid) -> Result<User>;

    async fn update_dates(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<()>;
}

/// Outbound message transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Single delivery attempt.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Retry `send` up to `max_attempts` times with linear backoff.
    /// Returns `TrackerError::SendFailed` once the budget is spent.
    async fn send_with_retry(&self, message: &Message, max_attempts: u32) -> Result<()> {
        let label = format!("{} {} send", self.name(), message.kind());
        RetryPolicy::new(max_attempts)
            .run(&label, |_| self.send(message))
            .await
    }
}
