//! Graceful shutdown coordination.

use tokio::sync::broadcast;
use tracing::{error, info};

/// Shutdown signal sender.
pub type ShutdownTx = broadcast::Sender<()>;

/// Shutdown signal receiver.
pub type ShutdownRx = broadcast::Receiver<()>;

/// Create a shutdown channel.
pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    broadcast::channel(1)
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = signal(SignalKind::interrupt())
            .and_then(|sigint| Ok((sigint, signal(SignalKind::terminate())?)));

        match handlers {
            Ok((mut sigint, mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {
                        info!("Received SIGINT, initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_channel() {
        let (tx, _rx) = shutdown_channel();
        let mut first = tx.subscribe();
        let mut second = tx.subscribe();

        assert!(first.try_recv().is_err());

        tx.send(()).unwrap();

        // Every subscriber sees the signal
        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }
}
