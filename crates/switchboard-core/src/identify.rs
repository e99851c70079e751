//! The identify handshake.
//!
//! A server becomes routable by sending `target: "i"` with its metadata.
//! The hub then:
//!
//! 1. stores the metadata and marks the server initialized,
//! 2. replies with an `Identify` message carrying the assigned id,
//! 3. sends one `Connect` per visible server already in the group,
//! 4. unless hidden, announces the newcomer to the group with a `Connect`.

use serde_json::value::RawValue;
use std::sync::Arc;
use switchboard_protocol::{codec, Message, PeerId, ServerInfo};
use tracing::info;

use crate::broadcast::Broadcaster;
use crate::registry::{Identified, PeerRegistry, RegistryError};
use crate::router::RouterError;

/// Runs the identify handshake for one peer.
#[derive(Debug, Clone)]
pub struct IdentifyHandshake {
    registry: Arc<PeerRegistry>,
    broadcaster: Broadcaster,
}

impl IdentifyHandshake {
    /// Create a handshake runner.
    #[must_use]
    pub fn new(registry: Arc<PeerRegistry>, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Identify `sender` with the payload of its identify request.
    ///
    /// A peer that identifies again gets its metadata replaced and the
    /// handshake repeated.
    ///
    /// Returns the number of messages queued.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Decode`] if the payload is not server info;
    /// the peer then stays uninitialized.
    pub async fn run(&self, sender: PeerId, data: Option<&RawValue>) -> Result<usize, RouterError> {
        let server_info: ServerInfo = codec::decode_data(data).map_err(RouterError::Decode)?;

        let Identified {
            peer,
            group_members,
        } = self
            .registry
            .identify(sender, server_info)
            .await
            .map_err(|e| match e {
                RegistryError::NotFound(id) => RouterError::UnknownSender(id),
                other => RouterError::Registry(other),
            })?;

        let Some(server_info) = peer.info.as_ref() else {
            return Err(RouterError::UnknownSender(sender));
        };

        info!(
            peer = peer.id,
            name = %server_info.name,
            group = %server_info.group,
            hidden = server_info.hidden,
            "{} has joined group {}",
            server_info.name,
            server_info.group
        );

        let mut queued = 0;

        let confirmation = Message::identify_confirmation(peer.id).map_err(RouterError::Encode)?;
        if self
            .broadcaster
            .send_to(&peer, &confirmation)
            .map_err(RouterError::Encode)?
        {
            queued += 1;
        }

        for existing in group_members.iter().filter(|member| !member.is_hidden()) {
            let Some(existing_info) = existing.info.as_ref() else {
                continue;
            };
            let introduction = Message::connect(&existing_info.descriptor(existing.id))
                .map_err(RouterError::Encode)?;
            if self
                .broadcaster
                .send_to(&peer, &introduction)
                .map_err(RouterError::Encode)?
            {
                queued += 1;
            }
        }

        if !server_info.hidden {
            let welcome =
                Message::connect(&server_info.descriptor(peer.id)).map_err(RouterError::Encode)?;
            queued += self
                .broadcaster
                .deliver_to(&group_members, &welcome)
                .map_err(RouterError::Encode)?;
        }

        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attach, attach_identified, drain, info};
    use serde_json::{json, Value};

    fn handshake(registry: &Arc<PeerRegistry>) -> IdentifyHandshake {
        IdentifyHandshake::new(registry.clone(), Broadcaster::new(registry.clone()))
    }

    fn payload(value: Value) -> Box<RawValue> {
        serde_json::value::to_raw_value(&value).unwrap()
    }

    #[tokio::test]
    async fn test_confirmation_carries_assigned_id() {
        let registry = Arc::new(PeerRegistry::new());
        attach(&registry).await;
        let (id, mut rx) = attach(&registry).await;

        let data = payload(json!({"group":"alpha","ip":"10.0.0.5","name":"A","port":"27015"}));
        handshake(&registry).run(id, Some(&data)).await.unwrap();

        let received = drain(&mut rx);
        assert_eq!(
            received,
            vec![json!({"context":"Identify","data":2,"target":"i"})]
        );
        assert!(registry.lookup(id).await.unwrap().is_initialized());
    }

    #[tokio::test]
    async fn test_group_introductions() {
        let registry = Arc::new(PeerRegistry::new());
        let (b, mut rx_b) = attach_identified(&registry, info("alpha", "B")).await;
        let (_, mut rx_c) = attach_identified(&registry, info("beta", "C")).await;
        let (a, mut rx_a) = attach(&registry).await;

        let data = payload(json!({"group":"alpha","ip":"10.0.0.9","name":"A","port":"27016","hidden":false}));
        let queued = handshake(&registry).run(a, Some(&data)).await.unwrap();
        assert_eq!(queued, 3);

        let to_a = drain(&mut rx_a);
        assert_eq!(to_a.len(), 2);
        assert_eq!(to_a[0]["context"], "Identify");
        assert_eq!(
            to_a[1],
            json!({"context":"Connect","data":{"id":b,"ip":"10.0.0.1","name":"B","port":"27015"},"target":"i"})
        );

        let to_b = drain(&mut rx_b);
        assert_eq!(
            to_b,
            vec![json!({"context":"Connect","data":{"id":a,"ip":"10.0.0.9","name":"A","port":"27016"},"target":"i"})]
        );

        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_hidden_peers_are_not_announced() {
        let registry = Arc::new(PeerRegistry::new());
        let (_, mut rx_hidden_old) =
            attach_identified(&registry, info("alpha", "Spectator").hidden()).await;
        let (_, mut rx_visible) = attach_identified(&registry, info("alpha", "Visible")).await;
        let (newcomer, mut rx_new) = attach(&registry).await;

        let data = payload(json!({"group":"alpha","ip":"10.0.0.9","name":"Ghost","port":"1","hidden":true}));
        handshake(&registry).run(newcomer, Some(&data)).await.unwrap();

        let to_new = drain(&mut rx_new);
        assert_eq!(to_new.len(), 2);
        assert_eq!(to_new[1]["data"]["name"], "Visible");

        assert!(drain(&mut rx_visible).is_empty());
        assert!(drain(&mut rx_hidden_old).is_empty());
    }

    #[tokio::test]
    async fn test_bad_payload_leaves_peer_uninitialized() {
        let registry = Arc::new(PeerRegistry::new());
        let (id, mut rx) = attach(&registry).await;

        let data = payload(json!({"group":"alpha"}));
        let result = handshake(&registry).run(id, Some(&data)).await;
        assert!(matches!(result, Err(RouterError::Decode(_))));

        let result = handshake(&registry).run(id, None).await;
        assert!(matches!(result, Err(RouterError::Decode(_))));

        assert!(!registry.lookup(id).await.unwrap().is_initialized());
        assert!(drain(&mut rx).is_empty());
    }

    fn connects_from(received: &[Value], id: PeerId) -> usize {
        received
            .iter()
            .filter(|msg| msg["context"] == "Connect" && msg["data"]["id"] == id)
            .count()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identify_introduces_once() {
        for _ in 0..50 {
            let registry = Arc::new(PeerRegistry::new());
            let (a, mut rx_a) = attach(&registry).await;
            let (b, mut rx_b) = attach(&registry).await;

            let run = |id: PeerId, name: &'static str| {
                let handshake = handshake(&registry);
                tokio::spawn(async move {
                    let data = payload(json!({"group":"alpha","ip":"10.0.0.1","name":name,"port":"1"}));
                    handshake.run(id, Some(&data)).await.unwrap();
                })
            };
            let (first, second) = (run(a, "A"), run(b, "B"));
            first.await.unwrap();
            second.await.unwrap();

            assert_eq!(connects_from(&drain(&mut rx_a), b), 1);
            assert_eq!(connects_from(&drain(&mut rx_b), a), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_sender() {
        let registry = Arc::new(PeerRegistry::new());
        let data = payload(json!({"group":"a","ip":"1","name":"n","port":"1"}));

        let result = handshake(&registry).run(7, Some(&data)).await;
        assert!(matches!(result, Err(RouterError::UnknownSender(7))));
    }
}
