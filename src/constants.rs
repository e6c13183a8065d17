//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! `config.rs` reads the environment and falls back to these values.

/// Default Redis endpoint backing the stream log, time-series store and parameters
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// One input stream per sensor; device id is the last `:` segment
pub const DEFAULT_INPUT_STREAMS: &[&str] = &[
    "sensor:temperature:01",
    "sensor:temperature:02",
    "sensor:temperature:03",
];

pub const DEFAULT_CONSUMER_GROUP: &str = "anomaly_detector_group";
pub const DEFAULT_CONSUMER_NAME: &str = "processor-01";

/// Stream the detector publishes alerts to
pub const DEFAULT_ALERT_STREAM: &str = "anomaly_alerts";
pub const DEFAULT_ALERT_CONSUMER_GROUP: &str = "alert_consumer_group";
pub const DEFAULT_ALERT_CONSUMER_NAME: &str = "alert_consumer-01";

/// Hash holding `window_size` and `std_dev_multiplier`
pub const DEFAULT_PARAMS_KEY: &str = "dashboard_params";

pub const DEFAULT_WINDOW_SIZE: usize = 100;
pub const DEFAULT_STD_DEV_MULTIPLIER: f64 = 2.0;

/// 30 days
pub const DEFAULT_TS_RETENTION_MS: u64 = 2_592_000_000;

/// Entries per pull
pub const DEFAULT_READ_COUNT: usize = 1;
/// Blocking pull timeout (milliseconds)
pub const DEFAULT_READ_BLOCK_MS: u64 = 1_000;
/// Pause after an empty live pull (milliseconds)
pub const DEFAULT_IDLE_SLEEP_MS: u64 = 100;

/// Fixed backoff between retries of a failed store call (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
/// 0 = retry until shutdown
pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 0;

/// 0 = recovery pass only at start-up
pub const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 0;

/// Alert `type` tag for the rolling-baseline rule
pub const STATISTICAL_ANOMALY_TYPE: &str = "statistical_anomaly";

/// Unit label attached to every temperature series
pub const TEMPERATURE_UNIT: &str = "celsius";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Time-series key for a device's temperature samples
pub fn series_key(device_id: &str) -> String {
    format!("device:{}:temp", device_id)
}

/// Marker key guarding a single alert emission
pub fn alert_marker_key(device_id: &str, timestamp_ms: i64) -> String {
    format!("alert:emitted:{}:{}", device_id, timestamp_ms)
}

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a string from the environment or use default
pub fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Read a parseable value from the environment or use default
pub fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a comma-separated list from the environment or use default
pub fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(name) {
        Ok(raw) => {
            let items: Vec<String> = raw
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if items.is_empty() {
                default.iter().map(|s| s.to_string()).collect()
            } else {
                items
            }
        }
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}
