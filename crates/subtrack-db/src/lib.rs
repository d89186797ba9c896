//! # Subtrack DB
//!
//! PostgreSQL implementation of [`SubscriptionRepository`]. Only the
//! queries the job engine needs live here; every call is bounded by the
//! configured query timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use subtrack_core::config::DatabaseConfig;
use subtrack_core::error::{Result, TrackerError};
use subtrack_core::traits::SubscriptionRepository;
use subtrack_core::types::{DueSubscription, DueWindow, User};

const SELECT_DUE: &str = "
    SELECT id, user_id, name, start_date, end_date, duration, is_cancelled
    FROM subscriptions
    WHERE end_date <= $1 AND end_date + INTERVAL '1 day' >= $1
";

const SELECT_USER: &str = "SELECT id, email FROM users WHERE id = $1";

const UPDATE_DATES: &str = "
    UPDATE subscriptions
    SET start_date = $1, end_date = $2
    WHERE id = $3
";

/// Subscription repository backed by a `sqlx` connection pool.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgRepository {
    /// Build a pool from config and verify connectivity.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.url)
            .await
            .map_err(|e| TrackerError::Query(format!("DB connect: {e}")))?;

        tracing::info!("🗄️ Database connected (max {} connections)", config.max_connections);
        Ok(Self::from_pool(pool, Duration::from_secs(config.query_timeout_secs)))
    }

    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        with_timeout(what, self.query_timeout, fut).await
    }

    async fn select_due(&self, window: DueWindow) -> Result<Vec<DueSubscription>> {
        let rows = self
            .bounded(
                "select due subscriptions",
                sqlx::query_as::<_, SubscriptionRow>(SELECT_DUE)
                    .bind(window.target)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(DueSubscription::from).collect())
    }
}

/// Run a driver call under `limit`; driver errors and timeouts become `Query`.
async fn with_timeout<T, F>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TrackerError::Query(format!("{what}: {e}"))),
        Err(_) => Err(TrackerError::Query(format!("{what}: timed out after {limit:?}"))),
    }
}

/// An update that touched no row means the subscription is gone.
fn ensure_updated(rows_affected: u64, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        return Err(TrackerError::NotFound(format!("subscription {id}")));
    }
    Ok(())
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    duration: String,
    is_cancelled: Option<bool>,
}

impl From<SubscriptionRow> for DueSubscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            duration: row.duration.trim().to_string(),
            // NULL reads as not cancelled
            is_cancelled: row.is_cancelled.unwrap_or(false),
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
        }
    }
}

#[async_trait]
impl SubscriptionRepository for PgRepository {
    async fn subscriptions_due_at(&self, days: u32) -> Result<Vec<DueSubscription>> {
        self.select_due(DueWindow::days_ahead(Utc::now(), days)).await
    }

    async fn subscriptions_needing_rollover(&self) -> Result<Vec<DueSubscription>> {
        self.select_due(DueWindow::at(Utc::now())).await
    }

    async fn user_by_id(&self, id: Uuid) -> Result<User> {
        self.bounded(
            "select user",
            sqlx::query_as::<_, UserRow>(SELECT_USER)
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await?
        .map(User::from)
        .ok_or_else(|| TrackerError::NotFound(format!("user {id}")))
    }

    async fn update_dates(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Result<()> {
        let result = self
            .bounded(
                "update subscription dates",
                sqlx::query(UPDATE_DATES)
                    .bind(start_date)
                    .bind(end_date)
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;

        ensure_updated(result.rows_affected(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use subtrack_core::types::DurationCategory;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_query_error() {
        let never = std::future::pending::<std::result::Result<(), sqlx::Error>>();
        let err = with_timeout("select user", Duration::from_millis(1), never)
            .await
            .unwrap_err();
        match err {
            TrackerError::Query(msg) => {
                assert!(msg.starts_with("select user: "), "{msg}");
                assert!(msg.contains("timed out"), "{msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_driver_error_maps_to_query_error() {
        let failing = async { Err::<(), _>(sqlx::Error::PoolTimedOut) };
        let err = with_timeout("update subscription dates", Duration::from_secs(5), failing)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Query(m) if m.starts_with("update subscription dates: ")));
    }

    #[tokio::test]
    async fn test_value_passes_through_before_deadline() {
        let rows = with_timeout("select due subscriptions", Duration::from_secs(5), async {
            Ok::<_, sqlx::Error>(vec![1, 2, 3])
        })
        .await
        .unwrap();
        assert_eq!(rows, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_rows_affected_is_not_found() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ensure_updated(0, id),
            Err(TrackerError::NotFound(m)) if m == format!("subscription {id}")
        ));
        assert!(ensure_updated(1, id).is_ok());
    }

    #[test]
    fn test_subscription_row_conversion() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Netflix subscription".into(),
            start_date: start,
            end_date: end,
            duration: " 6 months ".into(),
            is_cancelled: None,
        };
        let (id, user_id) = (row.id, row.user_id);

        let sub = DueSubscription::from(row);
        assert_eq!(sub.id, id);
        assert_eq!(sub.user_id, user_id);
        assert_eq!((sub.start_date, sub.end_date), (start, end));
        assert!(!sub.is_cancelled);
        assert_eq!(sub.duration_category().unwrap(), DurationCategory::SixMonths);
    }

    #[test]
    fn test_cancelled_flag_is_kept() {
        let now = Utc::now();
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Gym".into(),
            start_date: now,
            end_date: now,
            duration: "weekly".into(),
            is_cancelled: Some(true),
        };
        assert!(DueSubscription::from(row).is_cancelled);
    }
}
