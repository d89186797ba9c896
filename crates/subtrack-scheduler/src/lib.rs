//! # Subtrack Scheduler
//!
//! The recurring background job engine: once a day it reminds users about
//! upcoming renewals and rolls lapsed subscriptions into their next period.
//!
//! ## Architecture
//! ```text
//! Background (TaskTracker + CancellationToken, panic barrier)
//!   └── Scheduler::run_daily — sleep until HH:MM, run sweeps, repeat
//!         └── SweepEngine
//!               ├── reminders: one task per horizon (7, 5, 3, 1 days)
//!               │     ├── repo.subscriptions_due_at(h)
//!               │     ├── bounded job queue → N reminder workers
//!               │     │     └── repo.user_by_id → notifier.send_with_retry
//!               │     └── completion counter task (runs beside submission)
//!               └── rollover: one query, bounded queue → M rollover workers
//!                     └── new window = [end, end + period] → repo.update_dates
//! ```
//!
//! Job failures never stop sibling jobs; they are collected as
//! [`ErrorRecord`](subtrack_core::ErrorRecord)s in the sweep report.

pub mod background;
pub mod daily;
pub mod engine;
pub mod memory;
pub mod pool;
pub mod reminder;
pub mod rollover;

#[cfg(test)]
pub(crate) mod testing;

pub use background::Background;
pub use daily::{DailyTrigger, Scheduler, Trigger, next_trigger};
pub use engine::{DailyReport, SweepEngine};
pub use memory::InMemoryRepository;
pub use pool::{JobQueue, WaitGroup};
pub use reminder::{HorizonReport, ReminderJob, ReminderReport};
pub use rollover::{RolloverJob, RolloverReport};
