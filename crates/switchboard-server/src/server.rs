//! Accept loop for the Switchboard server.
//!
//! This module binds the TCP listener, hands every accepted connection to
//! the hub and coordinates graceful shutdown.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::shutdown::{self, ShutdownRx, ShutdownTx};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{Hub, HubError};
use switchboard_transport::{Accepted, TcpTransport, Transport};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Run the relay hub until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the listen address is invalid or cannot be bound.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr = config.metrics_addr()?;
        if let Err(e) = metrics::start_metrics_server(metrics_addr) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let allow_list = config.allow_list();
    info!("Allow-list holds {} public entries", allow_list.len());

    let hub = Arc::new(Hub::new(config.hub_config(), Arc::new(allow_list)));

    let addr = config.bind_addr()?;
    let transport = TcpTransport::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Switchboard listening on {}", addr);

    serve(
        hub,
        transport,
        config.drain_timeout(),
        shutdown::wait_for_shutdown_signal(),
    )
    .await;

    info!("Switchboard stopped");
    Ok(())
}

/// Accept connections on `transport` until `signal` resolves, then close
/// every open connection and wait up to `drain_timeout` for them to finish.
pub async fn serve<T, F>(hub: Arc<Hub>, transport: T, drain_timeout: Duration, signal: F)
where
    T: Transport,
    F: Future<Output = ()>,
{
    let (shutdown_tx, _) = shutdown::shutdown_channel();
    let mut connections = JoinSet::new();

    tokio::pin!(signal);

    loop {
        tokio::select! {
            () = &mut signal => break,

            accepted = transport.accept() => match accepted {
                Ok(accepted) => {
                    spawn_connection(&mut connections, hub.clone(), accepted, &shutdown_tx);
                }
                Err(e) => {
                    error!(transport = transport.name(), error = %e, "Failed to accept connection");
                    metrics::record_error("accept");
                }
            },

            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "Connection task failed");
                    metrics::record_error("task");
                }
            }
        }
    }

    info!(
        open = connections.len(),
        "Shutting down, closing open connections"
    );
    drop(transport);
    let _ = shutdown_tx.send(());

    let drained = tokio::time::timeout(drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Connections did not close in time, aborting"
        );
        connections.abort_all();
    }

    let leftover = hub.registry().clear().await;
    if !leftover.is_empty() {
        debug!(peers = leftover.len(), "Dropped peers left after drain");
    }
    metrics::record_registry(&hub.registry().stats().await);
}

fn spawn_connection(
    connections: &mut JoinSet<()>,
    hub: Arc<Hub>,
    accepted: Accepted,
    shutdown_tx: &ShutdownTx,
) {
    let shutdown: ShutdownRx = shutdown_tx.subscribe();
    let Accepted {
        stream,
        remote_addr,
    } = accepted;

    connections.spawn(async move {
        let _guard = ConnectionMetricsGuard::new();

        match hub.handle_connection(stream, remote_addr, shutdown).await {
            Ok(summary) => {
                debug!(
                    peer = summary.peer_id,
                    addr = %remote_addr,
                    lines = summary.lines,
                    dropped = summary.dropped,
                    "Session finished"
                );
                metrics::record_session(&summary);
            }
            Err(HubError::Rejected(addr)) => {
                debug!(addr = %addr, "Connection rejected");
                metrics::record_rejected();
            }
        }

        metrics::record_registry(&hub.registry().stats().await);
    });
}
