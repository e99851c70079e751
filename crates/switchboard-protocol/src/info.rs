//! Server metadata carried by identify requests and presence announcements.

use crate::message::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The port a game server advertises to its group.
///
/// Servers send it as a string, older ones as a number. It is echoed back
/// to other servers in whichever form it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdvertisedPort {
    Text(String),
    Number(u16),
}

impl fmt::Display for AdvertisedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertisedPort::Text(port) => f.write_str(port),
            AdvertisedPort::Number(port) => write!(f, "{}", port),
        }
    }
}

impl From<&str> for AdvertisedPort {
    fn from(port: &str) -> Self {
        AdvertisedPort::Text(port.to_string())
    }
}

impl From<u16> for AdvertisedPort {
    fn from(port: u16) -> Self {
        AdvertisedPort::Number(port)
    }
}

/// Payload of an identify request (`target: "i"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Group the server joins.
    pub group: String,
    /// Address other servers should use to reach it.
    pub ip: String,
    /// Display name.
    pub name: String,
    /// Advertised game port.
    pub port: AdvertisedPort,
    /// Hidden servers are left out of presence announcements.
    #[serde(default)]
    pub hidden: bool,
}

impl ServerInfo {
    /// Create server info for a visible server.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        ip: impl Into<String>,
        name: impl Into<String>,
        port: impl Into<AdvertisedPort>,
    ) -> Self {
        Self {
            group: group.into(),
            ip: ip.into(),
            name: name.into(),
            port: port.into(),
            hidden: false,
        }
    }

    /// Mark the server as hidden.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Describe the server holding `id` for a Connect announcement.
    #[must_use]
    pub fn descriptor(&self, id: PeerId) -> PeerDescriptor {
        PeerDescriptor {
            id,
            ip: self.ip.clone(),
            name: self.name.clone(),
            port: self.port.clone(),
        }
    }
}

/// Payload of a Connect announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub ip: String,
    pub name: String,
    pub port: AdvertisedPort,
}
