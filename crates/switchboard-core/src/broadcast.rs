//! Fan-out delivery over the peer registry.
//!
//! A message is encoded once and the same bytes are queued on every
//! recipient. A recipient that cannot take the line is logged and skipped;
//! the rest still receive it.

use bytes::Bytes;
use std::sync::Arc;
use switchboard_protocol::{codec, Message, PeerId, ProtocolError};
use tracing::{debug, trace, warn};

use crate::registry::{Peer, PeerRegistry};

/// Broadcast primitives.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<PeerRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver to every identified peer except the sender.
    ///
    /// Hidden peers receive broadcasts like everyone else.
    ///
    /// Returns the number of peers the message was queued for.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn all(&self, sender: &Peer, message: &Message) -> Result<usize, ProtocolError> {
        let line = codec::encode(message)?;
        let recipients = self
            .registry
            .select(|peer| peer.is_initialized() && peer.id != sender.id)
            .await;

        Ok(deliver_each(&recipients, &line))
    }

    /// Deliver to every identified peer in the sender's group except the sender.
    ///
    /// A sender without metadata has no group; nothing is delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn group(&self, sender: &Peer, message: &Message) -> Result<usize, ProtocolError> {
        let Some(group) = sender.group() else {
            debug!(peer = sender.id, "Group broadcast from peer without group");
            return Ok(0);
        };

        self.group_of(group, sender.id, message).await
    }

    /// Deliver to every identified peer in `group` except `except`.
    ///
    /// Used when the sender is no longer registered, e.g. to announce its departure.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn group_of(
        &self,
        group: &str,
        except: PeerId,
        message: &Message,
    ) -> Result<usize, ProtocolError> {
        let line = codec::encode(message)?;
        let recipients = self
            .registry
            .select(|peer| peer.in_group(group) && peer.id != except)
            .await;

        Ok(deliver_each(&recipients, &line))
    }

    /// Deliver to each peer in `recipients`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn deliver_to(&self, recipients: &[Peer], message: &Message) -> Result<usize, ProtocolError> {
        let line = codec::encode(message)?;
        Ok(deliver_each(recipients, &line))
    }

    /// Deliver to a single peer. Returns `true` if the line was queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn send_to(&self, recipient: &Peer, message: &Message) -> Result<bool, ProtocolError> {
        Ok(self.deliver_to(std::slice::from_ref(recipient), message)? == 1)
    }
}

fn deliver_each(recipients: &[Peer], line: &Bytes) -> usize {
    let mut delivered = 0;

    for peer in recipients {
        match peer.deliver(line.clone()) {
            Ok(()) => {
                delivered += 1;
                trace!(peer = peer.id, bytes = line.len(), "Queued line");
            }
            Err(e) => {
                warn!(peer = peer.id, error = %e, "Failed to deliver message");
            }
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attach, attach_identified, attach_with_capacity, drain, info};
    use switchboard_protocol::Target;
    use switchboard_transport::DeliveryError;

    fn chat() -> Message {
        Message::new("Chat", "hello", Target::BroadcastAll).unwrap()
    }

    #[tokio::test]
    async fn test_all_skips_sender_and_unidentified() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (x, mut rx_x) = attach_identified(&registry, info("alpha", "X")).await;
        let (_, mut rx_other_group) = attach_identified(&registry, info("beta", "Y")).await;
        let (_, mut rx_hidden) = attach_identified(&registry, info("alpha", "H").hidden()).await;
        let (_, mut rx_fresh) = attach(&registry).await;

        let sender = registry.lookup(x).await.unwrap();
        assert_eq!(broadcaster.all(&sender, &chat()).await.unwrap(), 2);

        assert!(drain(&mut rx_x).is_empty());
        assert_eq!(drain(&mut rx_other_group).len(), 1);
        assert_eq!(drain(&mut rx_hidden).len(), 1);
        assert!(drain(&mut rx_fresh).is_empty());
    }

    #[tokio::test]
    async fn test_group_stays_in_group() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (x, mut rx_x) = attach_identified(&registry, info("alpha", "X")).await;
        let (_, mut rx_same) = attach_identified(&registry, info("alpha", "Y")).await;
        let (_, mut rx_hidden) = attach_identified(&registry, info("alpha", "H").hidden()).await;
        let (_, mut rx_beta) = attach_identified(&registry, info("beta", "Z")).await;

        let sender = registry.lookup(x).await.unwrap();
        assert_eq!(broadcaster.group(&sender, &chat()).await.unwrap(), 2);

        assert!(drain(&mut rx_x).is_empty());
        assert_eq!(drain(&mut rx_same)[0]["data"], "hello");
        assert_eq!(drain(&mut rx_hidden).len(), 1);
        assert!(drain(&mut rx_beta).is_empty());
    }

    #[tokio::test]
    async fn test_group_without_metadata_is_noop() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (fresh, _) = attach(&registry).await;
        let (_, mut rx_other) = attach_identified(&registry, info("alpha", "Y")).await;

        let sender = registry.lookup(fresh).await.unwrap();
        assert_eq!(broadcaster.group(&sender, &chat()).await.unwrap(), 0);
        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn test_broken_recipient_does_not_stop_fanout() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (x, _rx_x) = attach_identified(&registry, info("alpha", "X")).await;
        let (_, rx_gone) = attach_identified(&registry, info("alpha", "Gone")).await;
        let (_, mut rx_ok) = attach_identified(&registry, info("alpha", "Ok")).await;
        drop(rx_gone);

        let sender = registry.lookup(x).await.unwrap();
        assert_eq!(broadcaster.group(&sender, &chat()).await.unwrap(), 1);
        assert_eq!(drain(&mut rx_ok).len(), 1);
    }

    #[tokio::test]
    async fn test_full_recipient_does_not_stop_fanout() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (x, _rx_x) = attach_identified(&registry, info("alpha", "X")).await;
        let (slow, mut rx_slow) = attach_with_capacity(&registry, 1).await;
        registry.identify(slow, info("alpha", "Slow")).await.unwrap();
        let (_, mut rx_ok) = attach_identified(&registry, info("alpha", "Ok")).await;

        let slow_peer = registry.lookup(slow).await.unwrap();
        slow_peer.deliver(Bytes::from_static(b"{}\n")).unwrap();
        assert_eq!(
            slow_peer.deliver(Bytes::from_static(b"{}\n")),
            Err(DeliveryError::Full)
        );

        let sender = registry.lookup(x).await.unwrap();
        assert_eq!(broadcaster.group(&sender, &chat()).await.unwrap(), 1);
        assert_eq!(broadcaster.all(&sender, &chat()).await.unwrap(), 1);

        assert_eq!(drain(&mut rx_ok).len(), 2);
        assert_eq!(drain(&mut rx_slow), vec![serde_json::json!({})]);
    }

    #[tokio::test]
    async fn test_deliver_to_listed_peers() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (a, mut rx_a) = attach_identified(&registry, info("alpha", "A")).await;
        let (_, mut rx_b) = attach_identified(&registry, info("alpha", "B")).await;

        let recipients = vec![registry.lookup(a).await.unwrap()];
        assert_eq!(broadcaster.deliver_to(&recipients, &chat()).unwrap(), 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_group_of_after_removal() {
        let registry = Arc::new(PeerRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (x, mut rx_x) = attach_identified(&registry, info("alpha", "X")).await;
        let (_, mut rx_y) = attach_identified(&registry, info("alpha", "Y")).await;
        registry.remove(x).await.unwrap();

        let goodbye = Message::disconnect(x).unwrap();
        assert_eq!(broadcaster.group_of("alpha", x, &goodbye).await.unwrap(), 1);
        assert!(drain(&mut rx_x).is_empty());
        assert_eq!(drain(&mut rx_y)[0]["context"], "Disconnect");
    }
}
