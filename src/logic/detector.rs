//! Anomaly Detector
//!
//! `EntryHandler` for sensor readings. Per entry:
//! 1. decode the reading
//! 2. baseline over the device's history strictly before this reading
//! 3. classify; on anomaly emit one alert
//! 4. persist the reading to the time-series store
//!
//! The loop acknowledges afterwards. Re-running all of it for a redelivered
//! reading is harmless: the window excludes the reading itself, the alert
//! sink dedups per reading and the series keeps the last write per timestamp.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::baseline::{rolling_baseline, BaselineOutcome};
use super::classifier::classify;
use super::consumer::{EntryHandler, EntryOutcome};
use super::params::Parameters;
use super::reading::{Alert, Reading};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::shutdown::ShutdownHandle;
use crate::constants::{series_key, TEMPERATURE_UNIT};
use crate::error::{ProcessError, StoreError};
use crate::store::{AlertSink, ParameterStore, Sample, StreamEntry, TimeSeriesStore};

pub struct AnomalyDetector {
    series: Arc<dyn TimeSeriesStore>,
    params: Arc<dyn ParameterStore>,
    alerts: Arc<dyn AlertSink>,
    retention_ms: u64,
    retry: RetryPolicy,
    shutdown: ShutdownHandle,
}

impl AnomalyDetector {
    pub fn new(
        series: Arc<dyn TimeSeriesStore>,
        params: Arc<dyn ParameterStore>,
        alerts: Arc<dyn AlertSink>,
        retention_ms: u64,
        retry: RetryPolicy,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            series,
            params,
            alerts,
            retention_ms,
            retry,
            shutdown,
        }
    }

    /// Judge and persist one decoded reading
    pub async fn process(&self, reading: &Reading, params: &Parameters) -> Result<EntryOutcome, ProcessError> {
        let key = series_key(&reading.device_id);
        let timestamp_ms = reading.timestamp_ms();

        let outcome = rolling_baseline(
            self.series.as_ref(),
            &key,
            params.window_size,
            timestamp_ms,
            &self.retry,
            &self.shutdown,
        )
        .await;

        // A baseline lost to shutdown must not let the reading through unjudged
        if matches!(outcome, BaselineOutcome::Unavailable { .. }) && self.shutdown.is_shutdown() {
            return Err(StoreError::Cancelled.into());
        }

        let classification = classify(reading.temperature, &outcome, params.std_dev_multiplier);
        if let Some(bounds) = &classification.bounds {
            debug!(
                device_id = %reading.device_id,
                value = reading.temperature,
                mean = bounds.mean,
                lower = bounds.lower,
                upper = bounds.upper,
                is_anomaly = classification.is_anomaly,
                "Reading classified"
            );
        }

        let mut result = EntryOutcome::Processed;
        if let (true, Some(baseline)) = (classification.is_anomaly, outcome.baseline()) {
            let alert = Alert::statistical(reading, baseline);
            let appended = retry_with_backoff(&self.retry, &self.shutdown, "alert_append", || {
                self.alerts.publish(&alert)
            })
            .await?;

            if appended {
                info!(
                    device_id = %alert.device_id,
                    temp_reading = alert.temp_reading,
                    moving_average = baseline.mean,
                    standard_deviation = baseline.std_dev,
                    timestamp = alert.timestamp,
                    "Anomaly detected"
                );
                result = EntryOutcome::Alerted;
            } else {
                debug!(device_id = %alert.device_id, timestamp = alert.timestamp, "Alert already emitted");
            }
        }

        let sample = Sample::new(timestamp_ms, reading.temperature);
        let labels = [("unit", TEMPERATURE_UNIT), ("device", reading.device_id.as_str())];
        retry_with_backoff(&self.retry, &self.shutdown, "ts_append", || {
            self.series.append(&key, sample, self.retention_ms, &labels)
        })
        .await?;

        Ok(result)
    }
}

#[async_trait]
impl EntryHandler for AnomalyDetector {
    type Context = Parameters;

    /// Parameters are refreshed once per batch
    async fn prepare(&self) -> Parameters {
        match retry_with_backoff(&self.retry, &self.shutdown, "params_get", || self.params.get()).await {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "Parameter read failed, using defaults");
                Parameters::default()
            }
        }
    }

    async fn handle(&self, params: &Parameters, entry: &StreamEntry) -> Result<EntryOutcome, ProcessError> {
        let reading = Reading::decode(&entry.topic, &entry.fields)?;
        debug!(
            entry_id = %entry.id,
            device_id = %reading.device_id,
            temperature = reading.temperature,
            "Reading decoded"
        );
        self.process(&reading, params).await
    }
}
