//! Configuration module

use std::time::Duration;

use crate::constants::{self, env_list, env_parse, env_string};
use crate::logic::retry::RetryPolicy;

/// Consumer-group identity for one processing loop
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Streams read under one group (fan-in)
    pub streams: Vec<String>,

    /// Consumer group name
    pub group: String,

    /// This consumer's name inside the group
    pub consumer: String,

    /// Entries requested per pull
    pub read_count: usize,

    /// Blocking pull timeout
    pub block: Duration,

    /// Pause after an empty live pull
    pub idle_sleep: Duration,

    /// Re-run the recovery pass this often while live (None = start-up only)
    pub recovery_interval: Option<Duration>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// Detector consumer settings
    pub detector: ConsumerConfig,

    /// Alert watcher consumer settings
    pub alert_watch: ConsumerConfig,

    /// Stream alerts are appended to
    pub alert_stream: String,

    /// Parameter Store hash key
    pub params_key: String,

    /// Time-series retention in milliseconds
    pub retention_ms: u64,

    /// Fixed delay between retries of a failed store call
    pub retry_delay: Duration,

    /// Maximum attempts per store call (0 = unbounded)
    pub retry_max_attempts: usize,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let read_count = env_parse("READ_COUNT", constants::DEFAULT_READ_COUNT).max(1);
        let block = Duration::from_millis(env_parse("READ_BLOCK_MS", constants::DEFAULT_READ_BLOCK_MS));
        let idle_sleep = Duration::from_millis(env_parse("IDLE_SLEEP_MS", constants::DEFAULT_IDLE_SLEEP_MS));
        let recovery_interval = match env_parse(
            "RECOVERY_INTERVAL_SECS",
            constants::DEFAULT_RECOVERY_INTERVAL_SECS,
        ) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let alert_stream = env_string("ALERT_STREAM", constants::DEFAULT_ALERT_STREAM);

        Self {
            redis_url: env_string("REDIS_URL", constants::DEFAULT_REDIS_URL),

            detector: ConsumerConfig {
                streams: env_list("INPUT_STREAMS", constants::DEFAULT_INPUT_STREAMS),
                group: env_string("CONSUMER_GROUP", constants::DEFAULT_CONSUMER_GROUP),
                consumer: env_string("CONSUMER_NAME", constants::DEFAULT_CONSUMER_NAME),
                read_count,
                block,
                idle_sleep,
                recovery_interval,
            },

            alert_watch: ConsumerConfig {
                streams: vec![alert_stream.clone()],
                group: env_string("ALERT_CONSUMER_GROUP", constants::DEFAULT_ALERT_CONSUMER_GROUP),
                consumer: env_string("ALERT_CONSUMER_NAME", constants::DEFAULT_ALERT_CONSUMER_NAME),
                read_count,
                block,
                idle_sleep,
                recovery_interval,
            },

            alert_stream,

            params_key: env_string("PARAMS_KEY", constants::DEFAULT_PARAMS_KEY),

            retention_ms: env_parse("TS_RETENTION_MS", constants::DEFAULT_TS_RETENTION_MS),

            retry_delay: Duration::from_millis(env_parse(
                "RETRY_DELAY_MS",
                constants::DEFAULT_RETRY_DELAY_MS,
            )),

            retry_max_attempts: env_parse("RETRY_MAX_ATTEMPTS", constants::DEFAULT_RETRY_MAX_ATTEMPTS),

            log_json: env_string("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
        }
    }

    /// Retry policy applied to every store call
    pub fn retry_policy(&self) -> RetryPolicy {
        let max_attempts = match self.retry_max_attempts {
            0 => None,
            n => Some(n),
        };
        RetryPolicy::fixed(self.retry_delay, max_attempts)
    }
}
