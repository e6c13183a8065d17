//! Cooperative shutdown
//!
//! The processing loop checks the handle between pulls; retry backoffs and
//! idle sleeps wake early when it fires. Work already in flight for an entry
//! is never interrupted by the handle itself.

use std::time::Duration;
use tokio::sync::watch;

/// Why the loop is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Received SIGINT (Ctrl+C)
    SigInt,
    /// Received SIGTERM
    SigTerm,
    /// Requested programmatically
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            Self::SigTerm => write!(f, "SIGTERM"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Handle for triggering and observing shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<Option<ShutdownSignal>>,
    receiver: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);
        Self { sender, receiver }
    }

    /// Trigger shutdown with the given reason; the first reason wins
    pub fn trigger(&self, signal: ShutdownSignal) {
        self.sender.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
    }

    /// Trigger a manual shutdown
    pub fn shutdown(&self) {
        self.trigger(ShutdownSignal::Manual);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Wait for shutdown signal
    pub async fn wait(&self) -> ShutdownSignal {
        let mut receiver = self.receiver.clone();
        loop {
            if let Some(signal) = *receiver.borrow_and_update() {
                return signal;
            }
            if receiver.changed().await.is_err() {
                return ShutdownSignal::Manual;
            }
        }
    }

    /// Sleep for `duration` unless shutdown fires first.
    ///
    /// Returns `false` when the sleep was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }

    /// Spawn a task translating SIGINT/SIGTERM into a shutdown trigger
    pub fn install_signal_handlers(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            tracing::info!(%signal, "Shutdown signal received, finishing in-flight work");
            handle.trigger(signal);
        });
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> ShutdownSignal {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::SigInt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                ShutdownSignal::SigTerm
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_shutdown() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutdown());

        handle.shutdown();
        assert!(handle.is_shutdown());
        assert_eq!(handle.wait().await, ShutdownSignal::Manual);
    }

    #[tokio::test]
    async fn test_first_signal_wins() {
        let handle = ShutdownHandle::new();
        handle.trigger(ShutdownSignal::SigTerm);
        handle.trigger(ShutdownSignal::SigInt);
        assert_eq!(handle.wait().await, ShutdownSignal::SigTerm);
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_shutdown() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.sleep(Duration::from_secs(30)).await });

        handle.shutdown();
        let completed = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sleep should wake on shutdown")
            .unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_sleep_completes_without_shutdown() {
        let handle = ShutdownHandle::new();
        assert!(handle.sleep(Duration::from_millis(5)).await);
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(ShutdownSignal::SigInt.to_string(), "SIGINT (Ctrl+C)");
        assert_eq!(ShutdownSignal::Manual.to_string(), "manual");
    }
}
