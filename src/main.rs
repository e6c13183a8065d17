//! Sensor Stream - Anomaly detection service
//!
//! ```bash
//! # Run the detector (default command)
//! sensor-stream
//!
//! # Follow the alert stream
//! sensor-stream alerts
//!
//! # Inspect / retune detection parameters
//! sensor-stream params show
//! sensor-stream params set --window-size 50 --multiplier 2.5
//! ```
//!
//! Configuration comes from the environment (optionally a `.env` file); see
//! `config.rs` for the variables and their defaults.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sensor_stream_core::config::Config;
use sensor_stream_core::constants::APP_VERSION;
use sensor_stream_core::logic::alert_watch::AlertWatcher;
use sensor_stream_core::logic::consumer::ConsumerLoop;
use sensor_stream_core::logic::detector::AnomalyDetector;
use sensor_stream_core::logic::params::Parameters;
use sensor_stream_core::logic::retry::{retry_with_backoff, RetryPolicy};
use sensor_stream_core::logic::shutdown::ShutdownHandle;
use sensor_stream_core::store::redis::{RedisAlertSink, RedisParameterStore, RedisStore};
use sensor_stream_core::store::{ParameterStore, StreamLog};

#[derive(Parser)]
#[command(name = "sensor-stream", version)]
#[command(about = "Consumer-group anomaly detection for sensor streams", long_about = None)]
struct Cli {
    /// Redis connection URL (overrides REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    /// Consumer name for the command being run (overrides CONSUMER_NAME
    /// for `detect`, ALERT_CONSUMER_NAME for `alerts`)
    #[arg(long)]
    consumer: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect anomalies on the input streams (default)
    Detect,
    /// Follow the alert stream and print each alert
    Alerts,
    /// Detection parameter management
    Params {
        #[command(subcommand)]
        command: ParamsCommands,
    },
}

#[derive(Subcommand)]
enum ParamsCommands {
    /// Print the current parameters as JSON
    Show,
    /// Update one or both parameters
    Set {
        /// Historical readings per baseline
        #[arg(long)]
        window_size: Option<usize>,

        /// Band half-width in standard deviations
        #[arg(long)]
        multiplier: Option<f64>,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the environment
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.redis_url {
            config.redis_url = url.clone();
        }
        if let Some(name) = &self.consumer {
            match self.command {
                Some(Commands::Alerts) => config.alert_watch.consumer = name.clone(),
                _ => config.detector.consumer = name.clone(),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    cli.apply(&mut config);

    init_tracing(config.log_json);
    info!(version = APP_VERSION, "Sensor Stream starting...");

    let shutdown = ShutdownHandle::new();
    shutdown.install_signal_handlers();
    let retry = config.retry_policy();

    let store = connect(&config, &retry, &shutdown).await?;

    match cli.command.unwrap_or(Commands::Detect) {
        Commands::Detect => run_detector(store, config, retry, shutdown).await,
        Commands::Alerts => run_alert_watch(store, config, retry, shutdown).await,
        Commands::Params { command } => {
            let params = RedisParameterStore::new(store, &config.params_key);
            run_params(&params, command).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sensor_stream_core=info,sensor_stream=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect and PING, retrying per policy until Redis answers
async fn connect(config: &Config, retry: &RetryPolicy, shutdown: &ShutdownHandle) -> Result<RedisStore> {
    let store = retry_with_backoff(retry, shutdown, "connect", || RedisStore::connect(&config.redis_url))
        .await
        .context("Failed to connect to Redis")?;

    retry_with_backoff(retry, shutdown, "ping", || store.ping())
        .await
        .context("Redis did not answer PING")?;
    info!("Redis connection verified");

    Ok(store)
}

async fn run_detector(
    store: RedisStore,
    config: Config,
    retry: RetryPolicy,
    shutdown: ShutdownHandle,
) -> Result<()> {
    let detector = AnomalyDetector::new(
        Arc::new(store.clone()),
        Arc::new(RedisParameterStore::new(store.clone(), &config.params_key)),
        Arc::new(RedisAlertSink::new(
            store.clone(),
            &config.alert_stream,
            config.retention_ms,
        )),
        config.retention_ms,
        retry.clone(),
        shutdown.clone(),
    );

    let consumer = ConsumerLoop::new(Arc::new(store), detector, config.detector, retry, shutdown);
    let stats = consumer.run().await;
    info!(processed = stats.processed, alerts = stats.alerts, "Detector stopped");
    Ok(())
}

async fn run_alert_watch(
    store: RedisStore,
    config: Config,
    retry: RetryPolicy,
    shutdown: ShutdownHandle,
) -> Result<()> {
    let watcher = ConsumerLoop::new(Arc::new(store), AlertWatcher, config.alert_watch, retry, shutdown);
    let stats = watcher.run().await;
    info!(processed = stats.processed, "Alert watcher stopped");
    Ok(())
}

async fn run_params(store: &dyn ParameterStore, command: ParamsCommands) -> Result<()> {
    match command {
        ParamsCommands::Show => {
            let params = store.get().await.context("Failed to read parameters")?;
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        ParamsCommands::Set {
            window_size,
            multiplier,
        } => {
            if window_size.is_none() && multiplier.is_none() {
                bail!("nothing to set: pass --window-size and/or --multiplier");
            }

            let current = store.get().await.context("Failed to read parameters")?;
            let params = Parameters::new(
                window_size.unwrap_or(current.window_size),
                multiplier.unwrap_or(current.std_dev_multiplier),
            )?;
            store.set(&params).await.context("Failed to write parameters")?;

            info!(
                window_size = params.window_size,
                std_dev_multiplier = params.std_dev_multiplier,
                "Parameters updated"
            );
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
    }
    Ok(())
}
