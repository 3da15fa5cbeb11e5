// --- Shutdown signals ------------------------------------------------------------------

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Resolves on SIGINT, SIGTERM or SIGQUIT (Ctrl-C only off unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = (
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        );
        match handlers {
            (Ok(mut sigterm), Ok(mut sigquit)) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                    _ = sigquit.recv() => {},
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("could not install signal handlers ({e}); only Ctrl-C will stop us");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("Shutdown signal received.");
}

/// Cancel `token` once a shutdown signal arrives.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    })
}
