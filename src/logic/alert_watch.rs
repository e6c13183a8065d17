//! Alert watcher
//!
//! Follows the alert stream under its own consumer group and logs each alert
//! in a human-readable line. Older records without statistics are shown too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::consumer::{EntryHandler, EntryOutcome};
use super::reading::{Alert, AlertKind};
use crate::error::ProcessError;
use crate::store::StreamEntry;

#[derive(Debug, Default)]
pub struct AlertWatcher;

/// One-line rendering of an alert
pub fn render(alert: &Alert) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(alert.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| format!("{} ms", alert.timestamp));

    match &alert.kind {
        AlertKind::StatisticalAnomaly {
            moving_average,
            standard_deviation,
        } => format!(
            "[{}] ANOMALY device {}: {:.2}°C (moving average {:.2}, std dev {:.2})",
            when, alert.device_id, alert.temp_reading, moving_average, standard_deviation
        ),
        AlertKind::Legacy { tag } => format!(
            "[{}] {} device {}: {:.2}°C",
            when,
            tag.to_uppercase(),
            alert.device_id,
            alert.temp_reading
        ),
    }
}

#[async_trait]
impl EntryHandler for AlertWatcher {
    type Context = ();

    async fn prepare(&self) -> Self::Context {}

    async fn handle(&self, _ctx: &(), entry: &StreamEntry) -> Result<EntryOutcome, ProcessError> {
        let alert = Alert::decode(&entry.fields)?;
        info!(
            entry_id = %entry.id,
            device_id = %alert.device_id,
            kind = alert.type_tag(),
            "{}",
            render(&alert)
        );
        Ok(EntryOutcome::Processed)
    }
}
