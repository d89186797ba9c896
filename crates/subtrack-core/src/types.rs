//! Domain types — the snapshots the job engine routes through its pools.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackerError;

/// A subscription row as read by the repository for one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Display name, e.g. "Netflix subscription".
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Raw stored duration category ("weekly", "monthly", "6 months", "yearly").
    /// Parsed lazily so a malformed row only fails its own job.
    pub duration: String,
    pub is_cancelled: bool,
}

impl DueSubscription {
    pub fn duration_category(&self) -> Result<DurationCategory, TrackerError> {
        self.duration.parse()
    }
}

/// The owner of a subscription — only what a reminder needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
}

/// Billing period of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationCategory {
    Weekly,
    Monthly,
    SixMonths,
    Yearly,
}

impl DurationCategory {
    pub const ALL: [DurationCategory; 4] = [
        DurationCategory::Weekly,
        DurationCategory::Monthly,
        DurationCategory::SixMonths,
        DurationCategory::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DurationCategory::Weekly => "weekly",
            DurationCategory::Monthly => "monthly",
            DurationCategory::SixMonths => "6 months",
            DurationCategory::Yearly => "yearly",
        }
    }

    /// Advance `from` by one period. Month arithmetic clamps to the last
    /// day of the target month (Jan 31 + 1 month = Feb 28/29).
    /// Returns `None` only when the result is out of chrono's range.
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DurationCategory::Weekly => from.checked_add_days(Days::new(7)),
            DurationCategory::Monthly => from.checked_add_months(Months::new(1)),
            DurationCategory::SixMonths => from.checked_add_months(Months::new(6)),
            DurationCategory::Yearly => from.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for DurationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationCategory {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| TrackerError::InvalidDuration(s.to_string()))
    }
}

/// The one-day inclusion band used by the "due" queries.
///
/// A subscription is due for `target` when
/// `target - 1 day <= end_date <= target`. The SQL repository uses the same
/// predicate (`end_date <= $1 AND end_date + INTERVAL '1 day' >= $1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueWindow {
    pub target: DateTime<Utc>,
}

impl DueWindow {
    pub fn at(target: DateTime<Utc>) -> Self {
        Self { target }
    }

    /// Window for reminders `days` ahead of `now`.
    pub fn days_ahead(now: DateTime<Utc>, days: u32) -> Self {
        Self::at(now + TimeDelta::days(i64::from(days)))
    }

    pub fn lower_bound(&self) -> DateTime<Utc> {
        self.target - TimeDelta::days(1)
    }

    pub fn contains(&self, end_date: DateTime<Utc>) -> bool {
        end_date <= self.target && end_date >= self.lower_bound()
    }
}

/// A reminder that a subscription renews soon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderNotice {
    pub to: String,
    pub subscription_name: String,
    pub days_before: u32,
    pub renewal_date: DateTime<Utc>,
}

impl ReminderNotice {
    /// Name as shown in the email: "netflix subscription" → "NETFLIX".
    pub fn display_name(&self) -> String {
        self.subscription_name
            .replace("subscription", "")
            .trim()
            .to_uppercase()
    }
}

/// An outgoing notification. One variant per template, each with its own
/// strongly-typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Reminder(ReminderNotice),
}

impl Message {
    pub fn recipients(&self) -> Vec<&str> {
        match self {
            Message::Reminder(notice) => vec![notice.to.as_str()],
        }
    }

    /// Short template label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Reminder(_) => "reminder",
        }
    }
}

/// A job-level failure collected during a sweep. Never halts sibling jobs.
#[derive(Debug)]
pub struct ErrorRecord {
    pub subscription_id: Option<Uuid>,
    /// Reminder horizon (days before renewal) when the failure came from a reminder sweep.
    pub horizon: Option<u32>,
    pub error: TrackerError,
}

impl ErrorRecord {
    pub fn new(error: TrackerError) -> Self {
        Self {
            subscription_id: None,
            horizon: None,
            error,
        }
    }

    pub fn for_subscription(mut self, id: Uuid) -> Self {
        self.subscription_id = Some(id);
        self
    }

    pub fn at_horizon(mut self, horizon: u32) -> Self {
        self.horizon = Some(horizon);
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(h) = self.horizon {
            write!(f, "[{h}d] ")?;
        }
        if let Some(id) = self.subscription_id {
            write!(f, "subscription {id}: ")?;
        }
        write!(f, "{}", self.error)
    }
}
