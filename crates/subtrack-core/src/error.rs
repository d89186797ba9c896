//! Error taxonomy shared by every subtrack crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Repository I/O failed (driver error, timeout, bad row).
    #[error("query error: {0}")]
    Query(String),

    /// A user or subscription the job refers to does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The notifier gave up after exhausting its attempts.
    #[error("send failed after {attempts} attempt(s): {reason}")]
    SendFailed { attempts: u32, reason: String },

    /// A background task or worker panicked and was recovered.
    #[error("task panicked: {0}")]
    Panic(String),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
