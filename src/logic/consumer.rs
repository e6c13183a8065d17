//! Consumer-Group Processing Loop
//!
//! Drives one consumer identity over one or more topics (fan-in):
//!
//! ```text
//! initialize ─→ recover (pending set, to exhaustion) ─→ live ──┐
//!                    ▲                                          │
//!                    └────── every recovery_interval ───────────┘
//! ```
//!
//! Each pulled batch gets one `EntryHandler::prepare` call, then every entry
//! goes through `EntryHandler::handle`. An entry is acknowledged only after
//! `handle` returns `Ok`, so whatever the handler persists is durable before
//! the log forgets the entry. A failed entry stays pending and is revisited
//! by the next recovery pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::error::{ProcessError, StoreError, StoreResult};
use crate::logic::retry::{retry_with_backoff, RetryPolicy};
use crate::logic::shutdown::ShutdownHandle;
use crate::store::{Cursor, GroupCreation, StartPosition, StreamEntry, StreamLog};

/// What a handler did with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Processed,
    /// Processed and an alert was emitted for it
    Alerted,
}

/// Per-entry business logic plugged into the loop
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// State shared by every entry of one pulled batch
    type Context: Send + Sync;

    /// Called once per non-empty batch, before its first entry
    async fn prepare(&self) -> Self::Context;

    /// Process one entry. `Ok` means it may be acknowledged.
    async fn handle(&self, ctx: &Self::Context, entry: &StreamEntry) -> Result<EntryOutcome, ProcessError>;
}

/// Which pass delivered an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Recovery,
    Live,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Recovery => write!(f, "recovery"),
            Phase::Live => write!(f, "live"),
        }
    }
}

/// Processing counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessorStats {
    /// Entries handled successfully
    pub processed: u64,
    /// Entries acknowledged
    pub acked: u64,
    /// Entries left pending after a handler error
    pub failed: u64,
    /// Alerts emitted
    pub alerts: u64,
    /// Entries completed by a recovery pass
    pub recovered: u64,
    pub recovery_passes: u64,
    pub last_recovery: Option<DateTime<Utc>>,
}

/// One consumer identity reading its topics under a group
pub struct ConsumerLoop<H: EntryHandler> {
    log: Arc<dyn StreamLog>,
    handler: H,
    config: ConsumerConfig,
    retry: RetryPolicy,
    shutdown: ShutdownHandle,
    stats: RwLock<ProcessorStats>,
}

impl<H: EntryHandler> ConsumerLoop<H> {
    pub fn new(
        log: Arc<dyn StreamLog>,
        handler: H,
        config: ConsumerConfig,
        retry: RetryPolicy,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            log,
            handler,
            config,
            retry,
            shutdown,
            stats: RwLock::new(ProcessorStats::default()),
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ProcessorStats {
        self.stats.read().clone()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Ensure the group exists on every topic, positioned at the start of the log
    pub async fn initialize(&self) -> StoreResult<()> {
        for topic in &self.config.streams {
            let created = retry_with_backoff(&self.retry, &self.shutdown, "create_group", || {
                self.log
                    .create_group(topic, &self.config.group, StartPosition::Earliest)
            })
            .await?;

            match created {
                GroupCreation::Created => {
                    info!(topic = %topic, group = %self.config.group, "Consumer group created")
                }
                GroupCreation::AlreadyExists => {
                    debug!(topic = %topic, group = %self.config.group, "Consumer group already exists")
                }
            }
        }
        Ok(())
    }

    /// Work through this consumer's pending entries until none are left.
    ///
    /// A per-topic cursor moves past every visited entry, so an entry that
    /// keeps failing is seen once per pass. Returns the number completed.
    pub async fn recover(&self) -> StoreResult<u64> {
        let before = self.stats.read().recovered;
        let mut cursors: Vec<(String, Cursor)> = self
            .config
            .streams
            .iter()
            .map(|t| (t.clone(), Cursor::pending_start()))
            .collect();

        info!(consumer = %self.config.consumer, "Recovery pass started");

        while !cursors.is_empty() && !self.shutdown.is_shutdown() {
            let entries = self.pull(&cursors, std::time::Duration::ZERO).await?;
            if entries.is_empty() {
                break;
            }

            let mut last_seen: HashMap<String, String> = HashMap::new();
            for entry in &entries {
                last_seen.insert(entry.topic.clone(), entry.id.clone());
            }

            self.process_batch(&entries, Phase::Recovery).await;

            // Topics that returned nothing have an exhausted pending set
            cursors = cursors
                .into_iter()
                .filter_map(|(topic, _)| {
                    last_seen
                        .remove(&topic)
                        .map(|id| (topic, Cursor::PendingAfter(id)))
                })
                .collect();
        }

        let completed = {
            let mut stats = self.stats.write();
            stats.recovery_passes += 1;
            stats.last_recovery = Some(Utc::now());
            stats.recovered - before
        };
        info!(consumer = %self.config.consumer, completed, "Recovery pass finished");
        Ok(completed)
    }

    /// One blocking pull for new entries; returns how many were delivered
    pub async fn poll_live(&self) -> StoreResult<usize> {
        let cursors: Vec<(String, Cursor)> = self
            .config
            .streams
            .iter()
            .map(|t| (t.clone(), Cursor::New))
            .collect();

        let entries = self.pull(&cursors, self.config.block).await?;
        self.process_batch(&entries, Phase::Live).await;
        Ok(entries.len())
    }

    /// Initialize, recover, then consume live until shutdown.
    ///
    /// Store errors never end the loop; only shutdown does.
    pub async fn run(&self) -> ProcessorStats {
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            streams = ?self.config.streams,
            "Consumer starting"
        );

        while let Err(e) = self.start().await {
            if !self.resume_after(e).await {
                return self.finish();
            }
        }

        let mut last_recovery = Instant::now();

        while !self.shutdown.is_shutdown() {
            if let Some(interval) = self.config.recovery_interval {
                if last_recovery.elapsed() >= interval {
                    last_recovery = Instant::now();
                    if let Err(e) = self.recover().await {
                        if !self.resume_after(e).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            match self.poll_live().await {
                Ok(0) => {
                    self.shutdown.sleep(self.config.idle_sleep).await;
                }
                Ok(_) => {}
                Err(e) => {
                    if !self.resume_after(e).await {
                        break;
                    }
                }
            }
        }

        self.finish()
    }

    async fn start(&self) -> StoreResult<()> {
        self.initialize().await?;
        self.recover().await?;
        let stats = self.stats();
        info!(
            consumer = %self.config.consumer,
            recovered = stats.recovered,
            failed = stats.failed,
            "Live phase started"
        );
        Ok(())
    }

    /// Decide whether the loop continues after a failed pass.
    ///
    /// Permanent errors (e.g. a group removed under us) get one backoff and
    /// a fresh group initialization.
    async fn resume_after(&self, err: StoreError) -> bool {
        if matches!(err, StoreError::Cancelled) {
            return false;
        }

        error!(consumer = %self.config.consumer, error = %err, "Store call failed, reinitializing consumer group");
        if !self.shutdown.sleep(self.retry.backoff(0)).await {
            return false;
        }
        match self.initialize().await {
            Ok(()) => true,
            Err(StoreError::Cancelled) => false,
            Err(e) => {
                warn!(error = %e, "Group reinitialization failed");
                true
            }
        }
    }

    fn finish(&self) -> ProcessorStats {
        let stats = self.stats();
        info!(
            consumer = %self.config.consumer,
            processed = stats.processed,
            acked = stats.acked,
            failed = stats.failed,
            alerts = stats.alerts,
            recovered = stats.recovered,
            "Consumer stopped"
        );
        stats
    }

    async fn pull(
        &self,
        cursors: &[(String, Cursor)],
        block: std::time::Duration,
    ) -> StoreResult<Vec<StreamEntry>> {
        retry_with_backoff(&self.retry, &self.shutdown, "pull", || {
            self.log.pull(
                &self.config.group,
                &self.config.consumer,
                cursors,
                self.config.read_count,
                block,
            )
        })
        .await
    }

    async fn process_batch(&self, entries: &[StreamEntry], phase: Phase) {
        if entries.is_empty() {
            return;
        }

        let ctx = self.handler.prepare().await;

        for entry in entries {
            // Anything not started stays pending for the next run
            if self.shutdown.is_shutdown() {
                debug!(entry_id = %entry.id, "Shutdown requested, leaving entry pending");
                break;
            }

            match self.handler.handle(&ctx, entry).await {
                Ok(outcome) => {
                    {
                        let mut stats = self.stats.write();
                        stats.processed += 1;
                        if outcome == EntryOutcome::Alerted {
                            stats.alerts += 1;
                        }
                        if phase == Phase::Recovery {
                            stats.recovered += 1;
                        }
                    }
                    self.acknowledge(entry).await;
                }
                Err(ProcessError::Store(StoreError::Cancelled)) => {
                    debug!(entry_id = %entry.id, topic = %entry.topic, "Entry interrupted by shutdown");
                    break;
                }
                Err(e) => {
                    self.stats.write().failed += 1;
                    warn!(
                        entry_id = %entry.id,
                        topic = %entry.topic,
                        %phase,
                        error = %e,
                        "Entry processing failed, leaving it unacknowledged"
                    );
                }
            }
        }
    }

    async fn acknowledge(&self, entry: &StreamEntry) {
        let acked = retry_with_backoff(&self.retry, &self.shutdown, "ack", || {
            self.log.ack(&entry.topic, &self.config.group, &entry.id)
        })
        .await;

        match acked {
            Ok(()) => {
                self.stats.write().acked += 1;
                debug!(entry_id = %entry.id, topic = %entry.topic, "Entry acknowledged");
            }
            Err(e) => {
                // Already persisted; redelivery is safe
                warn!(entry_id = %entry.id, topic = %entry.topic, error = %e, "Acknowledge failed, entry stays pending");
            }
        }
    }
}
