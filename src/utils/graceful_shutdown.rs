use std::sync::Arc;

use tokio::{signal, sync::watch};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested in-process through [`GracefulShutdown::trigger_shutdown`]
    Requested,
}

/// Turns OS signals into a single shutdown notification.
///
/// Any number of tasks may wait on [`wait_for_shutdown_signal`]; a waiter that
/// subscribes after the signal fired returns immediately.
///
/// [`wait_for_shutdown_signal`]: GracefulShutdown::wait_for_shutdown_signal
#[derive(Clone)]
pub struct GracefulShutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Manually trigger shutdown; only the first reason is kept
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });

        if first {
            tracing::info!("Shutdown initiated: {:?}", reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Listen for SIGINT and SIGTERM until one arrives
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => self.trigger_shutdown(ShutdownReason::Interrupt),
                    Err(e) => {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            _ = wait_for_sigterm() => {
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }
    }

    /// Wait until shutdown has been initiated and return its reason
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            // The sender lives in `self`, so the channel cannot close here
            Err(_) => None,
        };
        reason.unwrap_or(ShutdownReason::Requested)
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}
