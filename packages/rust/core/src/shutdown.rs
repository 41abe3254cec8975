//! Cooperative shutdown flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

/// Cloneable shutdown flag checked by the pipeline between stages.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Flip the flag on Ctrl-C, or SIGTERM on unix. Returns the listener task.
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("received shutdown signal, finishing the current stage");
            signal.request();
        })
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => settle(result).await,
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            settle(tokio::signal::ctrl_c().await).await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    settle(tokio::signal::ctrl_c().await).await;
}

/// Resolve only when the signal actually arrived. A failed registration
/// parks forever so the run is never cancelled by mistake.
async fn settle(result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Ctrl-C handler unavailable, shutdown signals are ignored");
        std::future::pending::<()>().await;
    }
}
