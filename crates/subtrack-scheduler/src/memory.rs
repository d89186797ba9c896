//! In-memory repository for `--demo` runs and tests.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use subtrack_core::error::{Result, TrackerError};
use subtrack_core::traits::SubscriptionRepository;
use subtrack_core::types::{DueSubscription, DueWindow, User};

/// Subscriptions and users held in process memory.
/// Applies the same due band as the SQL repository.
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, DueSubscription>,
    updates: usize,
    failing_horizons: HashSet<u32>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return its id.
    pub fn add_user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.write().users.insert(
            id,
            User {
                id,
                email: email.to_string(),
            },
        );
        id
    }

    pub fn add_subscription(&self, subscription: DueSubscription) {
        self.write().subscriptions.insert(subscription.id, subscription);
    }

    pub fn subscription(&self, id: Uuid) -> Option<DueSubscription> {
        self.read().subscriptions.get(&id).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.read().subscriptions.len()
    }

    /// Number of successful `update_dates` calls.
    pub fn update_count(&self) -> usize {
        self.read().updates
    }

    /// Make `subscriptions_due_at(days)` fail, to exercise error collection.
    pub fn fail_due_queries_for(&self, days: u32) {
        self.write().failing_horizons.insert(days);
    }

    fn in_window(&self, window: DueWindow) -> Vec<DueSubscription> {
        let mut due: Vec<_> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| window.contains(s.end_date))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.end_date);
        due
    }

    // Poisoning is ignored: no write leaves the maps half-updated.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryRepository {
    async fn subscriptions_due_at(&self, days: u32) -> Result<Vec<DueSubscription>> {
        if self.read().failing_horizons.contains(&days) {
            return Err(TrackerError::Query(format!("due query for {days}d unavailable")));
        }
        Ok(self.in_window(DueWindow::days_ahead(Utc::now(), days)))
    }

    async fn subscriptions_needing_rollover(&self) -> Result<Vec<DueSubscription>> {
        Ok(self.in_window(DueWindow::at(Utc::now())))
    }

    async fn user_by_id(&self, id: Uuid) -> Result<User> {
        self.read()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(format!("user {id}")))
    }

    async fn update_dates(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write();
        let sub = state
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| TrackerError::NotFound(format!("subscription {id}")))?;
        sub.start_date = start_date;
        sub.end_date = end_date;
        state.updates += 1;
        Ok(())
    }
}
