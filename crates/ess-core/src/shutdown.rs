//! Cooperative shutdown on Ctrl-C or SIGTERM.
//!
//! Long-running loops hold a [`watch::Receiver`] and stop at their next
//! await point once it flips to `true`.

use tokio::sync::watch;

/// Spawn a signal listener and return the receiving side of the shutdown
/// channel.
pub fn signal_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested");
        // All receivers gone means nobody is left to stop.
        let _ = tx.send(true);
    });
    rx
}

/// Whether shutdown has been requested.
pub fn requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}
