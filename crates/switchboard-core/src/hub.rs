//! Connection lifecycle.
//!
//! Each accepted connection runs through
//! `Accepted -> Authorizing -> Serving -> Closed` on its own task:
//!
//! - **Authorizing**: unauthorized addresses are closed before they get an id.
//! - **Serving**: read a line, decode it, dispatch it, repeat. Bad lines are
//!   logged and skipped; the connection stays open.
//! - **Closed**: entered on end of stream, a read error or shutdown. The
//!   peer leaves the registry and, if it was identified and visible, its
//!   group receives a `Disconnect` message.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::{codec, Message, PeerId, DEFAULT_MAX_LINE_LENGTH};
use switchboard_transport::{spawn_writer, Authorizer, LineReader};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::registry::PeerRegistry;
use crate::router::Router;

/// How long a closing connection may take to flush queued lines.
const WRITER_LINGER: Duration = Duration::from_secs(5);

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Lines that may be queued per connection before deliveries fail.
    pub outbox_capacity: usize,
    /// Maximum length of one inbound line in bytes.
    pub max_line_length: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 1024,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The remote address failed authorization.
    #[error("Connection from {0} is not authorized")]
    Rejected(SocketAddr),
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Authorizing,
    Serving,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Authorizing => "authorizing",
            ConnectionState::Serving => "serving",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What happened on a connection, reported once it closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Id the peer held.
    pub peer_id: PeerId,
    /// Lines read.
    pub lines: u64,
    /// Lines dropped because of a decode or routing error.
    pub dropped: u64,
    /// Messages queued for other peers (or the sender) as a result of its lines.
    pub queued: u64,
    /// Whether the peer had identified by the time it left.
    pub identified: bool,
}

/// The relay hub.
///
/// Owns the peer registry and router, and runs the lifecycle of every
/// connection handed to it.
pub struct Hub {
    config: HubConfig,
    registry: Arc<PeerRegistry>,
    router: Router,
    authorizer: Arc<dyn Authorizer>,
}

impl Hub {
    /// Create a hub with an empty registry.
    #[must_use]
    pub fn new(config: HubConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        info!("Creating hub with config: {:?}", config);
        let registry = Arc::new(PeerRegistry::new());
        Self {
            config,
            router: Router::new(registry.clone()),
            registry,
            authorizer,
        }
    }

    /// The peer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Run one connection until it closes.
    ///
    /// The connection ends when the remote closes it, on a read error, or
    /// when `shutdown` fires (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Rejected`] if the remote address is not
    /// authorized; the stream is closed without registering a peer.
    pub async fn handle_connection<S>(
        &self,
        stream: S,
        remote_addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<SessionSummary, HubError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        trace!(addr = %remote_addr, state = %ConnectionState::Accepted, "Connection state");
        trace!(addr = %remote_addr, state = %ConnectionState::Authorizing, "Connection state");

        if !self.authorizer.authorized(remote_addr) {
            warn!(
                ip = %remote_addr.ip(),
                port = remote_addr.port(),
                "Connection not authorized, closing"
            );
            drop(stream);
            return Err(HubError::Rejected(remote_addr));
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbox, writer) = spawn_writer(write_half, self.config.outbox_capacity);
        let peer_id = self.registry.register(remote_addr, outbox).await;

        info!(
            peer = peer_id,
            ip = %remote_addr.ip(),
            port = remote_addr.port(),
            "New connection established"
        );
        trace!(peer = peer_id, state = %ConnectionState::Serving, "Connection state");

        let mut summary = SessionSummary {
            peer_id,
            ..SessionSummary::default()
        };
        let mut lines = LineReader::new(read_half, self.config.max_line_length);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(peer = peer_id, "Shutdown signal received, closing connection");
                    break;
                }

                next = lines.next_line() => match next {
                    Ok(Some(line)) => self.handle_line(peer_id, &line, &mut summary).await,
                    Ok(None) => {
                        debug!(peer = peer_id, "Connection closed by peer");
                        break;
                    }
                    Err(e) if !e.is_fatal() => {
                        summary.lines += 1;
                        summary.dropped += 1;
                        error!(peer = peer_id, error = %e, "Failed to read line");
                    }
                    Err(e) => {
                        warn!(peer = peer_id, error = %e, "Read error on connection");
                        break;
                    }
                },
            }
        }

        drop(lines);
        self.close(peer_id, writer, &mut summary).await;

        Ok(summary)
    }

    async fn handle_line(&self, peer_id: PeerId, line: &str, summary: &mut SessionSummary) {
        summary.lines += 1;
        debug!(peer = peer_id, msg = %line, "Received line");

        if line.trim().is_empty() {
            return;
        }

        let message = match codec::decode(line) {
            Ok(message) => message,
            Err(e) => {
                summary.dropped += 1;
                error!(peer = peer_id, error = %e, "Failed to decode line");
                return;
            }
        };

        match self.router.dispatch(peer_id, message).await {
            Ok(queued) => summary.queued += queued as u64,
            Err(e) => {
                summary.dropped += 1;
                error!(peer = peer_id, error = %e, "Failed to handle line");
            }
        }
    }

    async fn close(&self, peer_id: PeerId, mut writer: JoinHandle<()>, summary: &mut SessionSummary) {
        trace!(peer = peer_id, state = %ConnectionState::Closed, "Connection state");

        match self.registry.remove(peer_id).await {
            Some(peer) => {
                summary.identified = peer.is_initialized();

                match peer.info.as_ref() {
                    Some(server_info) if !server_info.hidden => {
                        self.announce_disconnect(peer_id, &server_info.group).await;
                        info!(
                            peer = peer_id,
                            ip = %server_info.ip,
                            port = %server_info.port,
                            "Server disconnected"
                        );
                    }
                    _ => {
                        info!(
                            peer = peer_id,
                            addr = %peer.remote_addr,
                            "Uninitialized or hidden server disconnected"
                        );
                    }
                }
            }
            None => debug!(peer = peer_id, "Peer already removed from registry"),
        }

        if tokio::time::timeout(WRITER_LINGER, &mut writer).await.is_err() {
            warn!(peer = peer_id, "Writer did not finish in time, aborting");
            writer.abort();
        }
    }

    async fn announce_disconnect(&self, peer_id: PeerId, group: &str) {
        let goodbye = match Message::disconnect(peer_id) {
            Ok(message) => message,
            Err(e) => {
                error!(peer = peer_id, error = %e, "Failed to build disconnect message");
                return;
            }
        };

        match self
            .router
            .broadcaster()
            .group_of(group, peer_id, &goodbye)
            .await
        {
            Ok(count) => debug!(peer = peer_id, recipients = count, "Announced disconnect"),
            Err(e) => error!(peer = peer_id, error = %e, "Failed to announce disconnect"),
        }
    }
}
