//! The authoritative set of connected peers.
//!
//! Ids are small and dense: a new peer always gets the smallest positive
//! id not currently held, so an id is reused as soon as its holder leaves.

use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use switchboard_protocol::{PeerId, ServerInfo};
use switchboard_transport::{DeliveryError, Outbox};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Id is already held by another peer.
    #[error("Peer id {0} is already registered")]
    DuplicateId(PeerId),

    /// Ids start at 1.
    #[error("Peer id must be positive")]
    InvalidId,

    /// No peer holds this id.
    #[error("Peer not found: {0}")]
    NotFound(PeerId),
}

/// One connected server.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Hub-assigned id.
    pub id: PeerId,
    /// Address the connection came from.
    pub remote_addr: SocketAddr,
    /// Write queue of the peer's connection.
    pub outbox: Outbox,
    /// Metadata from the identify handshake.
    pub info: Option<ServerInfo>,
}

impl Peer {
    /// Create an unidentified peer.
    #[must_use]
    pub fn new(id: PeerId, remote_addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id,
            remote_addr,
            outbox,
            info: None,
        }
    }

    /// Whether the peer has completed the identify handshake.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.info.is_some()
    }

    /// Whether the peer is left out of presence announcements.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.info.as_ref().is_some_and(|info| info.hidden)
    }

    /// The peer's group, once identified.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.group.as_str())
    }

    /// Check if the peer is identified and belongs to `group`.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.group() == Some(group)
    }

    /// Queue an encoded line on the peer's connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer's queue is full or closed.
    pub fn deliver(&self, line: Bytes) -> Result<(), DeliveryError> {
        self.outbox.deliver(line)
    }
}

/// Result of storing identify metadata.
#[derive(Debug, Clone)]
pub struct Identified {
    /// The peer's updated state.
    pub peer: Peer,
    /// Other identified peers in the same group, hidden ones included.
    pub group_members: Vec<Peer>,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Connected peers.
    pub peers: usize,
    /// Peers that completed identify.
    pub initialized: usize,
    /// Identified peers that are hidden.
    pub hidden: usize,
    /// Distinct groups among identified peers.
    pub groups: usize,
}

/// The peer registry.
///
/// A single reader-writer lock covers the whole table: lookups and fan-out
/// scans share it, add/remove/identify take it exclusively. Delivery only
/// queues on a peer's outbox and never waits on a socket.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<BTreeMap<PeerId, Peer>>,
}

fn smallest_free_id(peers: &BTreeMap<PeerId, Peer>) -> PeerId {
    let mut candidate = 1;
    for id in peers.keys() {
        if *id != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The smallest positive id not currently in use.
    ///
    /// Use [`PeerRegistry::register`] to allocate and insert atomically.
    pub async fn allocate_id(&self) -> PeerId {
        smallest_free_id(&*self.peers.read().await)
    }

    /// Add a peer under its own id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is zero or already held.
    pub async fn add(&self, peer: Peer) -> Result<(), RegistryError> {
        if peer.id == 0 {
            return Err(RegistryError::InvalidId);
        }

        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.id) {
            return Err(RegistryError::DuplicateId(peer.id));
        }

        debug!(peer = peer.id, addr = %peer.remote_addr, "Peer added");
        peers.insert(peer.id, peer);
        Ok(())
    }

    /// Allocate an id and add a new unidentified peer in one step.
    pub async fn register(&self, remote_addr: SocketAddr, outbox: Outbox) -> PeerId {
        let mut peers = self.peers.write().await;
        let id = smallest_free_id(&peers);
        peers.insert(id, Peer::new(id, remote_addr, outbox));

        debug!(peer = id, addr = %remote_addr, total = peers.len(), "Peer registered");
        id
    }

    /// Remove a peer, returning its last state.
    pub async fn remove(&self, id: PeerId) -> Option<Peer> {
        let removed = self.peers.write().await.remove(&id);
        if removed.is_some() {
            debug!(peer = id, "Peer removed");
        }
        removed
    }

    /// Look up a peer by id.
    pub async fn lookup(&self, id: PeerId) -> Option<Peer> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Store identify metadata on a peer.
    ///
    /// The other identified members of the peer's group are captured under
    /// the same write lock, so two peers identifying into one group at once
    /// each see the other exactly once: either in their own member list or
    /// as a recipient of the other's announcement.
    ///
    /// # Errors
    ///
    /// Returns an error if no peer holds `id`.
    pub async fn identify(&self, id: PeerId, info: ServerInfo) -> Result<Identified, RegistryError> {
        let mut peers = self.peers.write().await;
        let peer = {
            let peer = peers.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
            peer.info = Some(info);
            peer.clone()
        };

        let group_members = match peer.group() {
            Some(group) => peers
                .values()
                .filter(|other| other.id != id && other.in_group(group))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(Identified {
            peer,
            group_members,
        })
    }

    /// Clone every peer matching `filter`, from one consistent view.
    pub async fn select<F>(&self, filter: F) -> Vec<Peer>
    where
        F: Fn(&Peer) -> bool,
    {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| filter(peer))
            .cloned()
            .collect()
    }

    /// Number of connected peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Check if no peer is connected.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let peers = self.peers.read().await;
        let identified: Vec<&ServerInfo> =
            peers.values().filter_map(|peer| peer.info.as_ref()).collect();

        RegistryStats {
            peers: peers.len(),
            initialized: identified.len(),
            hidden: identified.iter().filter(|info| info.hidden).count(),
            groups: identified
                .iter()
                .map(|info| info.group.as_str())
                .collect::<HashSet<_>>()
                .len(),
        }
    }

    /// Remove every peer.
    pub async fn clear(&self) -> Vec<Peer> {
        let peers = std::mem::take(&mut *self.peers.write().await);
        peers.into_values().collect()
    }
}
