//! # Subtrack Core
//!
//! Shared vocabulary for the subscription renewal job engine:
//! domain types, the error taxonomy, the gateway traits the scheduler
//! consumes, the retry policy, and TOML configuration.

pub mod config;
pub mod error;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::{SubTrackConfig, SweepKind};
pub use error::{Result, TrackerError};
pub use retry::RetryPolicy;
pub use traits::{Notifier, SubscriptionRepository};
pub use types::{
    DueSubscription, DueWindow, DurationCategory, ErrorRecord, Message, ReminderNotice, User,
};
