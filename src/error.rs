//! Error handling
//!
//! Collaborator failures are `StoreError`, entry payload problems are
//! `DecodeError`, and a single entry's processing outcome is `ProcessError`.
//! Only `StoreError::is_transient` failures are worth retrying.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure talking to the stream log, time-series store or parameter store
#[derive(Debug, Error)]
pub enum StoreError {
    // Infrastructure errors (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Backend answered but refused the command
    #[error("Command rejected by store: {0}")]
    Rejected(String),

    // Stored data could not be interpreted
    #[error("Malformed stored value in '{key}': {reason}")]
    MalformedValue { key: String, reason: String },

    // Retry loop gave up because shutdown was requested
    #[error("Shutdown requested while waiting on store")]
    Cancelled,
}

impl StoreError {
    /// Connectivity-class failures; everything else is permanent for the call
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Rejected(err.to_string())
        }
    }
}

/// A stream entry whose fields do not form a valid record
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a number: '{value}'")]
    NotANumber { field: &'static str, value: String },

    #[error("field '{field}' is not finite: {value}")]
    NotFinite { field: &'static str, value: f64 },
}

/// Outcome of a failed per-entry processing step.
///
/// Never escapes the consumer loop's entry boundary; the entry is simply
/// left unacknowledged.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("malformed entry: {0}")]
    Malformed(#[from] DecodeError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}
