//! Store Module - Collaborator interfaces
//!
//! The engine talks to its durable services only through these traits:
//! - `StreamLog`: consumer-group log (pull / acknowledge / create group / append)
//! - `TimeSeriesStore`: per-device numeric series (append / ranged read)
//! - `ParameterStore`: operator-tunable detection parameters
//! - `AlertSink`: idempotent alert emission
//!
//! `redis.rs` backs all four with one Redis deployment; `memory.rs` holds
//! in-process versions with the same semantics.

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::logic::params::Parameters;
use crate::logic::reading::Alert;

// ============================================================================
// STREAM LOG
// ============================================================================

/// One delivered stream entry
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub topic: String,
    pub fields: HashMap<String, String>,
}

/// Where a pull reads from, per topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// This consumer's delivered-but-unacknowledged entries with ids after the given one
    PendingAfter(String),
    /// Entries never delivered to any consumer in the group
    New,
}

impl Cursor {
    /// Start of the Pending Entry Set
    pub fn pending_start() -> Self {
        Cursor::PendingAfter("0".to_string())
    }

    /// Wire id for the pull command
    pub fn as_id(&self) -> &str {
        match self {
            Cursor::PendingAfter(id) => id,
            Cursor::New => ">",
        }
    }
}

/// Position a newly created group starts reading at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Beginning of the log
    Earliest,
    /// Only entries appended after creation
    Latest,
}

impl StartPosition {
    pub fn as_id(&self) -> &'static str {
        match self {
            StartPosition::Earliest => "0",
            StartPosition::Latest => "$",
        }
    }
}

/// Result of an idempotent group creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    Created,
    AlreadyExists,
}

/// Append-only, consumer-group capable log
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Create `group` on `topic` (and the topic itself if absent).
    /// An existing group is success, reported as `AlreadyExists`.
    async fn create_group(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> StoreResult<GroupCreation>;

    /// Read up to `count` entries per topic, blocking up to `block` when
    /// nothing is available. `cursors` pairs each topic with its cursor.
    async fn pull(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, Cursor)],
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>>;

    /// Remove an entry from the group's pending set. Idempotent.
    async fn ack(&self, topic: &str, group: &str, id: &str) -> StoreResult<()>;

    /// Append a record, returning its entry id
    async fn append(&self, topic: &str, fields: &[(String, String)]) -> StoreResult<String>;

    /// Liveness check
    async fn ping(&self) -> StoreResult<()>;
}

// ============================================================================
// TIME SERIES
// ============================================================================

/// One time-series point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self { timestamp_ms, value }
    }
}

/// Keyed append-only numeric series
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Append one sample, creating the series with `retention_ms` and
    /// `labels` on first use. Re-appending an existing timestamp overwrites it.
    async fn append(
        &self,
        key: &str,
        sample: Sample,
        retention_ms: u64,
        labels: &[(&str, &str)],
    ) -> StoreResult<()>;

    /// Up to `count` most recent samples (strictly before `before_ms` when
    /// given), oldest first. A missing series is an empty range.
    async fn range(&self, key: &str, count: usize, before_ms: Option<i64>) -> StoreResult<Vec<Sample>>;
}

// ============================================================================
// PARAMETERS & ALERTS
// ============================================================================

/// Shared detection parameters, written by operators
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Current parameters, defaults for anything unset or invalid
    async fn get(&self) -> StoreResult<Parameters>;

    /// Operator write path
    async fn set(&self, params: &Parameters) -> StoreResult<()>;
}

/// Destination for alert records
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Append `alert` once per `(device_id, timestamp)`.
    /// Returns `false` when it had already been emitted.
    async fn publish(&self, alert: &Alert) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_ids() {
        assert_eq!(Cursor::pending_start().as_id(), "0");
        assert_eq!(Cursor::PendingAfter("17-3".into()).as_id(), "17-3");
        assert_eq!(Cursor::New.as_id(), ">");
    }

    #[test]
    fn test_start_position_ids() {
        assert_eq!(StartPosition::Earliest.as_id(), "0");
        assert_eq!(StartPosition::Latest.as_id(), "$");
    }
}
