//! Transport abstraction traits for Switchboard.
//!
//! The hub never listens on its own; a transport hands it connections that
//! are already open and addressed.

use async_trait::async_trait;
use std::net::SocketAddr;
use switchboard_protocol::ProtocolError;
use thiserror::Error;
use tokio::net::TcpStream;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Framing error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether reading must stop after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Protocol(e) => e.is_fatal(),
            TransportError::Io(_) => true,
        }
    }
}

/// A freshly accepted connection.
#[derive(Debug)]
pub struct Accepted {
    /// The connected stream.
    pub stream: TcpStream,
    /// Address of the remote end.
    pub remote_addr: SocketAddr,
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Accepted, TransportError>;

    /// Get the transport name (e.g., "tcp").
    fn name(&self) -> &'static str;

    /// Get the local address the transport is bound to, if any.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
