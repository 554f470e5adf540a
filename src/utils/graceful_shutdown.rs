use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{signal, time::timeout};
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM (orchestrator stop)
    Terminate,
    /// Triggered from code
    Requested,
}

/// Coordinates process shutdown.
///
/// A single `CancellationToken` fans the shutdown out to every background task
/// and to the HTTP server; the drain of in-flight requests is bounded by
/// `drain_timeout`.
pub struct GracefulShutdown {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Mutex::new(None),
            drain_timeout,
        }
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason recorded by the first trigger, if shutdown has begun.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin shutdown. Only the first call is recorded.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        let mut current = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            tracing::debug!(?reason, "Shutdown already initiated, ignoring");
            return;
        }
        *current = Some(reason);
        drop(current);

        tracing::info!(?reason, "Initiating graceful shutdown");
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM (or a programmatic trigger) and start shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        let terminate = wait_for_sigterm()?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for SIGINT")?;
                tracing::info!("Received SIGINT (Ctrl+C)");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
            _ = self.token.cancelled() => {}
        }
        Ok(())
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        self.token.cancelled().await;
        self.reason().unwrap_or(ShutdownReason::Requested)
    }

    /// Run `drain` to completion or until the drain timeout elapses.
    ///
    /// Returns `false` when the timeout cut the drain short.
    pub async fn drain<F: Future<Output = ()>>(&self, drain: F) -> bool {
        match timeout(self.drain_timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain timeout exceeded, abandoning in-flight requests"
                );
                false
            }
        }
    }
}

#[cfg(unix)]
fn wait_for_sigterm() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    Ok(async move {
        sigterm.recv().await;
    })
}

#[cfg(not(unix))]
fn wait_for_sigterm() -> Result<impl Future<Output = ()>> {
    Ok(std::future::pending::<()>())
}
