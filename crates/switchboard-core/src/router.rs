//! Message router for Switchboard.
//!
//! The router looks at a decoded message's target and decides how it is
//! delivered: identify, broadcast to all, broadcast to the sender's group,
//! or direct send to one peer id.

use std::sync::Arc;
use switchboard_protocol::{Message, PeerId, ProtocolError, Target};
use thiserror::Error;
use tracing::{trace, warn};

use crate::broadcast::Broadcaster;
use crate::identify::IdentifyHandshake;
use crate::registry::{Peer, PeerRegistry, RegistryError};

/// Router errors.
///
/// None of these close the sender's connection; the offending message is
/// dropped.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Identify payload has the wrong shape.
    #[error("Invalid identify payload: {0}")]
    Decode(#[source] ProtocolError),

    /// Sender tried to route traffic before identifying.
    #[error("Peer {peer} is not initialized, cannot {action}")]
    NotInitialized {
        /// The sender.
        peer: PeerId,
        /// What it attempted.
        action: &'static str,
    },

    /// Sender is no longer registered.
    #[error("Sender {0} is not registered")]
    UnknownSender(PeerId),

    /// A message could not be encoded for delivery.
    #[error("Failed to encode message: {0}")]
    Encode(#[source] ProtocolError),

    /// Registry rejected an update.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The central message router.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<PeerRegistry>,
    broadcaster: Broadcaster,
    identify: IdentifyHandshake,
}

impl Router {
    /// Create a router over a registry.
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        let broadcaster = Broadcaster::new(registry.clone());
        let identify = IdentifyHandshake::new(registry.clone(), broadcaster.clone());
        Self {
            registry,
            broadcaster,
            identify,
        }
    }

    /// The broadcaster this router delivers through.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Route one message received from `sender`.
    ///
    /// Messages with an unrecognized target, and direct sends to an id no
    /// identified peer holds, are logged and dropped without error.
    ///
    /// Returns the number of messages queued for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the identify payload is malformed, or if an
    /// uninitialized sender tries to broadcast or direct-send.
    pub async fn dispatch(&self, sender: PeerId, message: Message) -> Result<usize, RouterError> {
        match &message.target {
            Target::Identify => self.identify.run(sender, message.data.as_deref()).await,

            Target::BroadcastAll => {
                let peer = self.initialized_sender(sender, "broadcast to all").await?;
                let count = self
                    .broadcaster
                    .all(&peer, &message)
                    .await
                    .map_err(RouterError::Encode)?;
                trace!(peer = sender, recipients = count, "Broadcast to all");
                Ok(count)
            }

            Target::BroadcastGroup => {
                let peer = self.initialized_sender(sender, "broadcast to group").await?;
                let count = self
                    .broadcaster
                    .group(&peer, &message)
                    .await
                    .map_err(RouterError::Encode)?;
                trace!(peer = sender, recipients = count, "Broadcast to group");
                Ok(count)
            }

            Target::Direct(number) => {
                self.initialized_sender(sender, "direct-send").await?;

                let recipient = match message.target.peer_id() {
                    Some(id) => self.registry.lookup(id).await,
                    None => None,
                };
                let Some(recipient) = recipient.filter(Peer::is_initialized) else {
                    warn!(peer = sender, receiver = %number, "Unknown receiver, dropping message");
                    return Ok(0);
                };

                let queued = self
                    .broadcaster
                    .send_to(&recipient, &message)
                    .map_err(RouterError::Encode)?;
                trace!(peer = sender, receiver = recipient.id, "Direct send");
                Ok(usize::from(queued))
            }

            Target::Unrecognized(target) => {
                warn!(peer = sender, target = %target, "Unknown target, dropping message");
                Ok(0)
            }
        }
    }

    async fn initialized_sender(
        &self,
        sender: PeerId,
        action: &'static str,
    ) -> Result<Peer, RouterError> {
        let peer = self
            .registry
            .lookup(sender)
            .await
            .ok_or(RouterError::UnknownSender(sender))?;

        if !peer.is_initialized() {
            return Err(RouterError::NotInitialized {
                peer: sender,
                action,
            });
        }

        Ok(peer)
    }
}
