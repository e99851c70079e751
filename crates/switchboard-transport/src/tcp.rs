//! Plain TCP transport.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::traits::{Accepted, Transport, TransportError};

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a TCP listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;

        info!("TCP transport listening on {}", addr);

        Ok(Self { listener })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Accepted, TransportError> {
        let (stream, remote_addr) = self.listener.accept().await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %remote_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        debug!("Accepted TCP connection from {}", remote_addr);

        Ok(Accepted {
            stream,
            remote_addr,
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}
