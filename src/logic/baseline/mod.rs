//! Baseline Module - Rolling Statistics Engine
//!
//! Computes a device's `(mean, sample_std_dev)` over the `window_size` most
//! recent stored readings that precede the reading being judged.
//!
//! # Architecture
//! - `types.rs`: `Baseline`, `BaselineOutcome`
//!
//! # Failure Strategy
//! Store errors never propagate: they become `BaselineOutcome::Unavailable`,
//! which the classifier treats exactly like insufficient history.

pub mod types;

pub use types::{Baseline, BaselineOutcome};

use tracing::{debug, warn};

use crate::logic::retry::{retry_with_backoff, RetryPolicy};
use crate::logic::shutdown::ShutdownHandle;
use crate::store::{Sample, TimeSeriesStore};

/// Turn a fetched window into an outcome.
///
/// `samples` must be at most `window_size` long, oldest first.
pub fn from_window(samples: &[Sample], window_size: usize) -> BaselineOutcome {
    if window_size == 0 || samples.len() < window_size {
        return BaselineOutcome::InsufficientHistory {
            have: samples.len(),
            need: window_size,
        };
    }

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    match Baseline::from_values(&values) {
        Some(b) if b.mean.is_finite() && b.std_dev.is_finite() => BaselineOutcome::Available(b),
        Some(_) => BaselineOutcome::Unavailable {
            reason: "window statistics are not finite".to_string(),
        },
        None => BaselineOutcome::InsufficientHistory { have: 0, need: window_size },
    }
}

/// Fetch the window for `series_key` strictly before `before_ms` and compute
/// its baseline. Pure read; nothing is written.
pub async fn rolling_baseline(
    store: &dyn TimeSeriesStore,
    series_key: &str,
    window_size: usize,
    before_ms: i64,
    retry: &RetryPolicy,
    shutdown: &ShutdownHandle,
) -> BaselineOutcome {
    let fetched = retry_with_backoff(retry, shutdown, "ts_range", || {
        store.range(series_key, window_size, Some(before_ms))
    })
    .await;

    match fetched {
        Ok(samples) => {
            let outcome = from_window(&samples, window_size);
            debug!(series = series_key, window_size, fetched = samples.len(), ?outcome, "Baseline computed");
            outcome
        }
        Err(e) => {
            warn!(series = series_key, error = %e, "Baseline unavailable");
            BaselineOutcome::Unavailable { reason: e.to_string() }
        }
    }
}
