use tokio::sync::watch;

use crate::prelude::*;

/// Create a connected shutdown trigger and listener.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger(sender), Shutdown(receiver))
}

pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Shutdown signal observed by the long-running loops at their wait points.
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Resolve once the shutdown is requested or the trigger is gone.
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|is_requested| *is_requested).await;
    }
}

/// Wait for Ctrl+C or, on Unix, `SIGTERM`.
///
/// Per <https://github.com/tokio-rs/axum/blob/main/examples/graceful-shutdown/src/main.rs>.
pub async fn signal() -> Result {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install the signal handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to install the Ctrl+C handler")?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("failed to install the Ctrl+C handler")?;

    info!("shutdown requested");
    Ok(())
}
