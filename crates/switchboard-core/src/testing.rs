//! Test helpers shared by the core modules.

use bytes::Bytes;
use serde_json::Value;
use std::net::SocketAddr;
use switchboard_protocol::{PeerId, ServerInfo};
use switchboard_transport::Outbox;
use tokio::sync::mpsc;

use crate::registry::PeerRegistry;

/// A distinct loopback address per index.
pub fn addr(n: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40_000 + n))
}

/// Register a peer whose outbox is read directly by the test.
pub async fn attach(registry: &PeerRegistry) -> (PeerId, mpsc::Receiver<Bytes>) {
    attach_with_capacity(registry, 64).await
}

/// Register a peer whose outbox holds at most `capacity` lines.
pub async fn attach_with_capacity(
    registry: &PeerRegistry,
    capacity: usize,
) -> (PeerId, mpsc::Receiver<Bytes>) {
    let (outbox, rx) = Outbox::channel(capacity);
    let id = registry.register(addr(registry.len().await as u16), outbox).await;
    (id, rx)
}

/// Register and identify a peer.
pub async fn attach_identified(
    registry: &PeerRegistry,
    info: ServerInfo,
) -> (PeerId, mpsc::Receiver<Bytes>) {
    let (id, rx) = attach(registry).await;
    registry.identify(id, info).await.unwrap();
    (id, rx)
}

/// Visible server info in `group`.
pub fn info(group: &str, name: &str) -> ServerInfo {
    ServerInfo::new(group, "10.0.0.1", name, "27015")
}

/// Drain every queued line as JSON.
pub fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Value> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        assert_eq!(line.last(), Some(&b'\n'));
        lines.push(serde_json::from_slice(&line).unwrap());
    }
    lines
}
