//! Redis backend
//!
//! One Redis deployment plays every collaborator role:
//! - Streams + consumer groups (`XREADGROUP` / `XACK` / `XGROUP CREATE`)
//! - RedisTimeSeries (`TS.ADD` / `TS.REVRANGE`)
//! - a hash for the operator parameters
//! - a Lua script making alert emission idempotent

use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::streams::{StreamId, StreamReadReply};
use ::redis::{Client, RedisError, Script, Value};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    AlertSink, Cursor, GroupCreation, ParameterStore, Sample, StartPosition, StreamEntry, StreamLog,
    TimeSeriesStore,
};
use crate::constants::alert_marker_key;
use crate::error::{StoreError, StoreResult};
use crate::logic::params::Parameters;
use crate::logic::reading::Alert;

/// Sets the marker and appends the alert in one step; 1 when appended
const EMIT_ALERT_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'PX', ARGV[1]) then
    redis.call('XADD', KEYS[2], '*', unpack(ARGV, 2))
    return 1
end
return 0
"#;

/// Shared connection to the Redis deployment.
///
/// `ConnectionManager` reconnects on its own; a dropped connection surfaces
/// as a transient `StoreError` and the caller's retry policy takes over.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %redact(url), "Connected to Redis");
        Ok(Self { conn })
    }
}

/// Drop credentials from a connection URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_string(),
    }
}

/// Text of one stream field. Invalid UTF-8 is replaced, never rejected.
fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        other => ::redis::from_redis_value(other).ok(),
    }
}

/// Decoding never fails the pull; a bad field is left for the handler to reject
fn decode_entry(topic: &str, raw: StreamId) -> StreamEntry {
    let mut fields = HashMap::with_capacity(raw.map.len());
    for (name, value) in raw.map {
        match field_text(&value) {
            Some(text) => {
                fields.insert(name, text);
            }
            None => warn!(topic, entry_id = %raw.id, field = %name, "Dropping non-text stream field"),
        }
    }
    StreamEntry {
        id: raw.id,
        topic: topic.to_string(),
        fields,
    }
}

fn is_missing_series(err: &RedisError) -> bool {
    err.to_string().to_ascii_lowercase().contains("key does not exist")
}

#[async_trait]
impl StreamLog for RedisStore {
    async fn create_group(
        &self,
        topic: &str,
        group: &str,
        start: StartPosition,
    ) -> StoreResult<GroupCreation> {
        let mut conn = self.conn.clone();
        let created: Result<(), RedisError> = ::redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg(start.as_id())
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => Ok(GroupCreation::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupCreation::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, Cursor)],
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = ::redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count.max(1));

        // BLOCK only matters for new entries; pending reads answer immediately
        let live = cursors.iter().all(|(_, c)| *c == Cursor::New);
        if live && !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }

        cmd.arg("STREAMS");
        for (topic, _) in cursors {
            cmd.arg(topic);
        }
        for (_, cursor) in cursors {
            cmd.arg(cursor.as_id());
        }

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for raw in key.ids {
                entries.push(decode_entry(&key.key, raw));
            }
        }
        Ok(entries)
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = ::redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn append(&self, topic: &str, fields: &[(String, String)]) -> StoreResult<String> {
        let mut cmd = ::redis::cmd("XADD");
        cmd.arg(topic).arg("*");
        for (name, value) in fields {
            cmd.arg(name).arg(value);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesStore for RedisStore {
    async fn append(
        &self,
        key: &str,
        sample: Sample,
        retention_ms: u64,
        labels: &[(&str, &str)],
    ) -> StoreResult<()> {
        let mut cmd = ::redis::cmd("TS.ADD");
        cmd.arg(key)
            .arg(sample.timestamp_ms)
            .arg(sample.value)
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("ON_DUPLICATE")
            .arg("LAST");
        if !labels.is_empty() {
            cmd.arg("LABELS");
            for (name, value) in labels {
                cmd.arg(*name).arg(*value);
            }
        }

        let mut conn = self.conn.clone();
        let _stored_at: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn range(&self, key: &str, count: usize, before_ms: Option<i64>) -> StoreResult<Vec<Sample>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut cmd = ::redis::cmd("TS.REVRANGE");
        cmd.arg(key).arg("-");
        match before_ms {
            Some(before) if before <= 0 => return Ok(Vec::new()),
            Some(before) => cmd.arg(before - 1),
            None => cmd.arg("+"),
        };
        cmd.arg("COUNT").arg(count);

        let mut conn = self.conn.clone();
        let newest_first: Vec<(i64, String)> = match cmd.query_async(&mut conn).await {
            Ok(points) => points,
            Err(e) if is_missing_series(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut samples = Vec::with_capacity(newest_first.len());
        for (timestamp_ms, raw) in newest_first.into_iter().rev() {
            let value: f64 = raw.trim().parse().map_err(|_| StoreError::MalformedValue {
                key: key.to_string(),
                reason: format!("sample at {} is '{}'", timestamp_ms, raw),
            })?;
            samples.push(Sample::new(timestamp_ms, value));
        }
        Ok(samples)
    }
}

/// Parameters kept in one Redis hash
#[derive(Clone)]
pub struct RedisParameterStore {
    store: RedisStore,
    key: String,
}

impl RedisParameterStore {
    pub fn new(store: RedisStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

#[async_trait]
impl ParameterStore for RedisParameterStore {
    async fn get(&self) -> StoreResult<Parameters> {
        let mut conn = self.store.conn.clone();
        let fields: HashMap<String, String> = ::redis::cmd("HGETALL")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(Parameters::from_fields(&fields))
    }

    async fn set(&self, params: &Parameters) -> StoreResult<()> {
        let mut cmd = ::redis::cmd("HSET");
        cmd.arg(&self.key);
        for (field, value) in params.to_fields() {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.store.conn.clone();
        let _added: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

/// Alert stream writer guarded by per-reading markers
#[derive(Clone)]
pub struct RedisAlertSink {
    store: RedisStore,
    topic: String,
    marker_ttl_ms: u64,
    script: Script,
}

impl RedisAlertSink {
    /// Markers expire after `marker_ttl_ms`; keep it at least as long as
    /// entries can sit unacknowledged.
    pub fn new(store: RedisStore, topic: impl Into<String>, marker_ttl_ms: u64) -> Self {
        Self {
            store,
            topic: topic.into(),
            marker_ttl_ms: marker_ttl_ms.max(1),
            script: Script::new(EMIT_ALERT_SCRIPT),
        }
    }
}

#[async_trait]
impl AlertSink for RedisAlertSink {
    async fn publish(&self, alert: &Alert) -> StoreResult<bool> {
        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(alert_marker_key(&alert.device_id, alert.timestamp))
            .key(&self.topic)
            .arg(self.marker_ttl_ms);
        for (name, value) in alert.to_fields() {
            invocation.arg(name).arg(value);
        }

        let mut conn = self.store.conn.clone();
        let appended: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(appended == 1)
    }
}
