//! Retry Logic for Store Calls
//!
//! Every blocking collaborator call (pull, persist, append-alert, acknowledge,
//! parameter read) goes through [`retry_with_backoff`]. Only transient
//! failures (`StoreError::is_transient`) are retried; anything else is handed
//! straight back to the caller.
//!
//! ```text
//! ┌────────────────────────────┐
//! │  RetryPolicy               │
//! │  - max_attempts: None      │  (unbounded)
//! │  - initial_backoff: 5s     │
//! │  - backoff_multiplier: 1.0 │  (fixed delay)
//! └─────────────┬──────────────┘
//!               ├─→ Attempt 1: Immediate
//!               ├─→ Attempt 2: Wait 5s
//!               └─→ ...until success or shutdown
//! ```
//!
//! Backoff sleeps wake early on shutdown and the call fails with
//! `StoreError::Cancelled`.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};
use crate::logic::shutdown::ShutdownHandle;

/// Retry policy configuration.
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first (None = until shutdown)
    pub max_attempts: Option<usize>,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (1.0 = fixed delay)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    /// Unbounded retries with a fixed 5s delay
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5), None)
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts
    pub fn fixed(delay: Duration, max_attempts: Option<usize>) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Backoff to wait after the failed attempt number `attempt` (0-indexed)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as usize) as i32);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * factor;
        if !backoff_ms.is_finite() || backoff_ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(backoff_ms as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made
    pub fn allows_another(&self, attempts: usize) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, exhausts the policy,
/// or shutdown is requested during a backoff.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    shutdown: &ShutdownHandle,
    operation_name: &str,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempt = attempts, "Store call succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if !policy.allows_another(attempts) {
                    error!(
                        operation = operation_name,
                        attempt = attempts,
                        error = %err,
                        "Retries exhausted, giving up"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff(attempts - 1);
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Lost connection to store, retrying"
                );

                if !shutdown.sleep(backoff).await {
                    return Err(StoreError::Cancelled);
                }
            }
        }
    }
}
