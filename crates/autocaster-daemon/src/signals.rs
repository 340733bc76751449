//! Signal handling for graceful shutdown.

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `shutdown` on SIGTERM or SIGINT.
///
/// # Errors
/// Returns an error if the SIGTERM handler cannot be installed.
pub fn setup_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Received SIGINT");
                } else {
                    return;
                }
            }
            () = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });

    Ok(())
}
