//! In-process store implementations
//!
//! Same contracts as the Redis backend: consumer groups with per-consumer
//! pending sets, last-write-wins time series, hash-style parameters and
//! marker-guarded alerts. Each store can be told to fail with a transient
//! error so retry and recovery paths can be exercised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{
    AlertSink, Cursor, GroupCreation, ParameterStore, Sample, StartPosition, StreamEntry, StreamLog,
    TimeSeriesStore,
};
use crate::error::{StoreError, StoreResult};
use crate::logic::params::Parameters;
use crate::logic::reading::Alert;

/// Consume one unit of an injected failure budget
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn parse_seq(id: &str) -> u64 {
    id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

// ============================================================================
// STREAM LOG
// ============================================================================

#[derive(Debug, Default)]
struct GroupState {
    /// Number of entries handed out as "new"
    delivered: usize,
    /// seq -> owning consumer
    pending: BTreeMap<u64, String>,
}

#[derive(Debug, Default)]
struct TopicLog {
    entries: Vec<(u64, HashMap<String, String>)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

/// Which kind of pull a consumer issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullKind {
    Pending,
    New,
}

/// Pull or acknowledgement as observed by the log, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Pull { kind: PullKind },
    Ack {
        topic: String,
        id: String,
    },
}

/// In-process consumer-group log
#[derive(Debug, Default)]
pub struct MemoryStreamLog {
    topics: Mutex<HashMap<String, TopicLog>>,
    events: Mutex<Vec<LogEvent>>,
    failing_pulls: AtomicUsize,
    rejecting_pulls: AtomicUsize,
    failing_acks: AtomicUsize,
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` pulls fail with a connection error
    pub fn fail_next_pulls(&self, n: usize) {
        self.failing_pulls.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` pulls fail with a permanent rejection
    pub fn reject_next_pulls(&self, n: usize) {
        self.rejecting_pulls.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` acknowledgements fail with a connection error
    pub fn fail_next_acks(&self, n: usize) {
        self.failing_acks.store(n, Ordering::SeqCst);
    }

    /// Field maps of every entry on `topic`, oldest first
    pub fn entries(&self, topic: &str) -> Vec<HashMap<String, String>> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.entries.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }

    /// Size of `group`'s pending set on `topic`
    pub fn pending_count(&self, topic: &str, group: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    pub fn group_exists(&self, topic: &str, group: &str) -> bool {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.groups.contains_key(group))
            .unwrap_or(false)
    }

    /// Every pull and acknowledgement so far, in order
    pub fn history(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    fn append_entry(&self, topic: &str, fields: HashMap<String, String>) -> String {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        log.next_seq += 1;
        let seq = log.next_seq;
        log.entries.push((seq, fields));
        format!("{}-0", seq)
    }
}

#[async_trait]
impl StreamLog for MemoryStreamLog {
    async fn create_group(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> StoreResult<GroupCreation> {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }

        let delivered = match start {
            StartPosition::Earliest => 0,
            StartPosition::Latest => log.entries.len(),
        };
        log.groups.insert(
            group.to_string(),
            GroupState {
                delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(GroupCreation::Created)
    }

    async fn pull(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, Cursor)],
        count: usize,
        _block: Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        if take_failure(&self.failing_pulls) {
            return Err(StoreError::Connection("injected pull failure".to_string()));
        }
        if take_failure(&self.rejecting_pulls) {
            return Err(StoreError::Rejected("injected pull rejection".to_string()));
        }

        let mut topics = self.topics.lock();
        let mut out = Vec::new();
        let mut kind = PullKind::New;

        for (topic, cursor) in cursors {
            let log = topics
                .get_mut(topic)
                .ok_or_else(|| StoreError::Rejected(format!("NOGROUP no such key '{}'", topic)))?;
            let TopicLog { entries, groups, .. } = log;
            let state = groups.get_mut(group).ok_or_else(|| {
                StoreError::Rejected(format!("NOGROUP no such consumer group '{}'", group))
            })?;

            match cursor {
                Cursor::PendingAfter(after) => {
                    kind = PullKind::Pending;
                    let after = parse_seq(after);
                    let seqs: Vec<u64> = state
                        .pending
                        .range(after + 1..)
                        .filter(|(_, owner)| owner.as_str() == consumer)
                        .map(|(seq, _)| *seq)
                        .take(count)
                        .collect();
                    for seq in seqs {
                        if let Some((_, fields)) = entries.iter().find(|(s, _)| *s == seq) {
                            out.push(StreamEntry {
                                id: format!("{}-0", seq),
                                topic: topic.clone(),
                                fields: fields.clone(),
                            });
                        }
                    }
                }
                Cursor::New => {
                    let end = (state.delivered + count).min(entries.len());
                    for (seq, fields) in &entries[state.delivered..end] {
                        state.pending.insert(*seq, consumer.to_string());
                        out.push(StreamEntry {
                            id: format!("{}-0", seq),
                            topic: topic.clone(),
                            fields: fields.clone(),
                        });
                    }
                    state.delivered = end;
                }
            }
        }

        self.events.lock().push(LogEvent::Pull { kind });
        Ok(out)
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> StoreResult<()> {
        if take_failure(&self.failing_acks) {
            return Err(StoreError::Connection("injected ack failure".to_string()));
        }

        let mut topics = self.topics.lock();
        if let Some(state) = topics.get_mut(topic).and_then(|t| t.groups.get_mut(group)) {
            state.pending.remove(&parse_seq(id));
        }
        self.events.lock().push(LogEvent::Ack {
            topic: topic.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn append(&self, topic: &str, fields: &[(String, String)]) -> StoreResult<String> {
        Ok(self.append_entry(topic, fields.iter().cloned().collect()))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

// ============================================================================
// TIME SERIES
// ============================================================================

#[derive(Debug, Default)]
struct Series {
    retention_ms: u64,
    labels: Vec<(String, String)>,
    points: BTreeMap<i64, f64>,
}

/// In-process time-series store
#[derive(Debug, Default)]
pub struct MemoryTimeSeries {
    series: Mutex<HashMap<String, Series>>,
    failing_ranges: AtomicBool,
    failing_appends: AtomicUsize,
    appends: AtomicUsize,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every range read fail with a connection error while `on`
    pub fn fail_ranges(&self, on: bool) {
        self.failing_ranges.store(on, Ordering::SeqCst);
    }

    /// Make the next `n` appends fail with a connection error
    pub fn fail_next_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// All stored samples for `key`, oldest first
    pub fn samples(&self, key: &str) -> Vec<Sample> {
        self.series
            .lock()
            .get(key)
            .map(|s| s.points.iter().map(|(t, v)| Sample::new(*t, *v)).collect())
            .unwrap_or_default()
    }

    /// Labels the series was created with
    pub fn labels(&self, key: &str) -> Vec<(String, String)> {
        self.series
            .lock()
            .get(key)
            .map(|s| s.labels.clone())
            .unwrap_or_default()
    }

    pub fn retention_ms(&self, key: &str) -> Option<u64> {
        self.series.lock().get(key).map(|s| s.retention_ms)
    }

    /// Successful appends, including overwrites
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeries {
    async fn append(
        &self,
        key: &str,
        sample: Sample,
        retention_ms: u64,
        labels: &[(&str, &str)],
    ) -> StoreResult<()> {
        if take_failure(&self.failing_appends) {
            return Err(StoreError::Connection("injected append failure".to_string()));
        }

        let mut all = self.series.lock();
        let series = all.entry(key.to_string()).or_insert_with(|| Series {
            retention_ms,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            points: BTreeMap::new(),
        });
        series.points.insert(sample.timestamp_ms, sample.value);

        if series.retention_ms > 0 {
            if let Some((&newest, _)) = series.points.iter().next_back() {
                let cutoff = newest.saturating_sub(series.retention_ms as i64);
                series.points = series.points.split_off(&cutoff);
            }
        }

        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn range(&self, key: &str, count: usize, before_ms: Option<i64>) -> StoreResult<Vec<Sample>> {
        if self.failing_ranges.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("injected range failure".to_string()));
        }

        let all = self.series.lock();
        let Some(series) = all.get(key) else {
            return Ok(Vec::new());
        };

        let end = before_ms.unwrap_or(i64::MAX);
        let mut window: Vec<Sample> = series
            .points
            .range(..end)
            .rev()
            .take(count)
            .map(|(t, v)| Sample::new(*t, *v))
            .collect();
        window.reverse();
        Ok(window)
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// In-process parameter hash
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    fields: RwLock<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one raw field, bypassing validation (operator typo, old dashboard)
    pub fn set_raw(&self, field: &str, value: &str) {
        self.fields.write().insert(field.to_string(), value.to_string());
    }

    /// Number of `get` calls served
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get(&self) -> StoreResult<Parameters> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Parameters::from_fields(&self.fields.read()))
    }

    async fn set(&self, params: &Parameters) -> StoreResult<()> {
        self.fields.write().extend(params.to_fields());
        Ok(())
    }
}

// ============================================================================
// ALERTS
// ============================================================================

/// Alert sink appending to a [`MemoryStreamLog`] topic
#[derive(Debug)]
pub struct MemoryAlertSink {
    log: Arc<MemoryStreamLog>,
    topic: String,
    emitted: Mutex<HashSet<(String, i64)>>,
}

impl MemoryAlertSink {
    pub fn new(log: Arc<MemoryStreamLog>, topic: impl Into<String>) -> Self {
        Self {
            log,
            topic: topic.into(),
            emitted: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn publish(&self, alert: &Alert) -> StoreResult<bool> {
        let marker = (alert.device_id.clone(), alert.timestamp);
        let mut emitted = self.emitted.lock();
        if !emitted.insert(marker) {
            return Ok(false);
        }
        self.log
            .append_entry(&self.topic, alert.to_fields().into_iter().collect());
        Ok(true)
    }
}
