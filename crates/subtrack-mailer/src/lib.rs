//! # Subtrack Mailer
//!
//! Notifier implementations: SMTP delivery via lettre, and a log-only
//! notifier for environments without mail credentials.

pub mod log;
pub mod render;
pub mod smtp;

pub use log::LogNotifier;
pub use render::{RenderedEmail, render};
pub use smtp::SmtpMailer;
