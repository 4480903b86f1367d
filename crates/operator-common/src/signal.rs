//! Shutdown signal handling

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` once a shutdown signal arrives
///
/// Handler installation failures are returned immediately.
pub fn cancel_on_signal(token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
        token.cancel();
    });
    Ok(())
}
