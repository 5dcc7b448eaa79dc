//! OS shutdown signals.

use tracing::{error, info};

/// Completes when the process receives SIGHUP, SIGINT or SIGTERM.
///
/// Falls back to Ctrl+C when the Unix handlers cannot be installed. If no
/// handler can be installed at all the future never completes, leaving
/// supervision to daemon failures.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::hangup()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sighup), Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sighup.recv() => info!(signal = "SIGHUP", "Received shutdown signal"),
                    _ = sigint.recv() => info!(signal = "SIGINT", "Received shutdown signal"),
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "Received shutdown signal"),
                }
                return;
            }
            (hup, int, term) => {
                let reason = [hup.err(), int.err(), term.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                error!(error = %reason, "Failed to install signal handlers, using Ctrl+C only");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "ctrl_c", "Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
