//! Shared harness for the end-to-end tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sensor_stream_core::config::ConsumerConfig;
use sensor_stream_core::logic::consumer::ConsumerLoop;
use sensor_stream_core::logic::detector::AnomalyDetector;
use sensor_stream_core::logic::params::Parameters;
use sensor_stream_core::logic::reading::Alert;
use sensor_stream_core::logic::retry::RetryPolicy;
use sensor_stream_core::logic::shutdown::ShutdownHandle;
use sensor_stream_core::store::memory::{
    MemoryAlertSink, MemoryParameterStore, MemoryStreamLog, MemoryTimeSeries,
};
use sensor_stream_core::store::{ParameterStore, StreamLog};

pub const GROUP: &str = "anomaly_detector_group";
pub const CONSUMER: &str = "processor-01";
pub const ALERTS: &str = "anomaly_alerts";

pub fn topic(device: &str) -> String {
    format!("sensor:temperature:{}", device)
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(1), None)
}

pub struct Harness {
    pub log: Arc<MemoryStreamLog>,
    pub series: Arc<MemoryTimeSeries>,
    pub params: Arc<MemoryParameterStore>,
    pub sink: Arc<MemoryAlertSink>,
    pub shutdown: ShutdownHandle,
}

impl Harness {
    pub fn new() -> Self {
        let log = Arc::new(MemoryStreamLog::new());
        let sink = Arc::new(MemoryAlertSink::new(log.clone(), ALERTS));
        Self {
            log,
            series: Arc::new(MemoryTimeSeries::new()),
            params: Arc::new(MemoryParameterStore::new()),
            sink,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Same stores, fresh process: a new shutdown handle
    pub fn restart(&self) -> Self {
        Self {
            log: self.log.clone(),
            series: self.series.clone(),
            params: self.params.clone(),
            sink: self.sink.clone(),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn config(&self, devices: &[&str]) -> ConsumerConfig {
        ConsumerConfig {
            streams: devices.iter().map(|d| topic(d)).collect(),
            group: GROUP.to_string(),
            consumer: CONSUMER.to_string(),
            read_count: 10,
            block: Duration::ZERO,
            idle_sleep: Duration::from_millis(1),
            recovery_interval: None,
        }
    }

    pub fn detector(&self, devices: &[&str], retry: RetryPolicy) -> ConsumerLoop<AnomalyDetector> {
        let detector = AnomalyDetector::new(
            self.series.clone(),
            self.params.clone(),
            self.sink.clone(),
            2_592_000_000,
            retry.clone(),
            self.shutdown.clone(),
        );
        ConsumerLoop::new(
            self.log.clone(),
            detector,
            self.config(devices),
            retry,
            self.shutdown.clone(),
        )
    }

    pub async fn set_params(&self, window_size: usize, multiplier: f64) {
        let params = Parameters::new(window_size, multiplier).unwrap();
        self.params.set(&params).await.unwrap();
    }

    /// Append a reading the way a producer would
    pub async fn publish(&self, device: &str, seconds: f64, temperature: f64) -> String {
        self.publish_raw(
            device,
            &[
                ("device_id", device.to_string()),
                ("timestamp", seconds.to_string()),
                ("temperature_c", temperature.to_string()),
                ("humidity_percent", "45.0".to_string()),
            ],
        )
        .await
    }

    pub async fn publish_raw(&self, device: &str, fields: &[(&str, String)]) -> String {
        let fields: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.log.append(&topic(device), &fields).await.unwrap()
    }

    pub async fn publish_history(&self, device: &str, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            self.publish(device, i as f64 + 1.0, *v).await;
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.log
            .entries(ALERTS)
            .iter()
            .map(|fields| Alert::decode(fields).unwrap())
            .collect()
    }
}

/// Poll every 5ms until `ready` holds or about two seconds pass
pub async fn wait_until(mut ready: impl FnMut() -> bool) {
    for _ in 0..400 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until a live pull comes back empty
pub async fn drain(consumer: &ConsumerLoop<AnomalyDetector>) {
    while consumer.poll_live().await.unwrap() > 0 {}
}
