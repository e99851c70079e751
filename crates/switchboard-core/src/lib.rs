//! # switchboard-core
//!
//! Peer registry, message routing and connection lifecycle for the
//! Switchboard relay hub.
//!
//! - **PeerRegistry** - Connected servers and their hub-assigned ids
//! - **Router** - Decides where each inbound message goes
//! - **IdentifyHandshake** - Activates a server and introduces it to its group
//! - **Broadcaster** - Fan-out to all servers or to one group
//! - **Hub** - Runs one connection from authorization to disconnect
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │     Hub     │────▶│   Router    │────▶│ Broadcaster │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   │
//!        │                   ▼                   │
//!        │            ┌─────────────┐            │
//!        │            │  Identify   │            │
//!        │            └─────────────┘            │
//!        ▼                   │                   ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                     PeerRegistry                     │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod broadcast;
pub mod hub;
pub mod identify;
pub mod registry;
pub mod router;

#[cfg(test)]
mod testing;

pub use broadcast::Broadcaster;
pub use hub::{ConnectionState, Hub, HubConfig, HubError, SessionSummary};
pub use identify::IdentifyHandshake;
pub use registry::{Identified, Peer, PeerRegistry, RegistryError, RegistryStats};
pub use router::{Router, RouterError};
