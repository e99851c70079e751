//! # switchboard-protocol
//!
//! Wire protocol definitions for the Switchboard relay hub.
//!
//! Game servers talk to the hub over a plain TCP stream carrying
//! newline-delimited JSON objects, one message per line:
//!
//! ```text
//! {"context":"Chat","data":{"text":"hello"},"target":"g"}\n
//! ```
//!
//! ## Targets
//!
//! - `"i"` - Identify / hub control messages
//! - `"b"` - Broadcast to every identified server
//! - `"g"` - Broadcast to every identified server in the sender's group
//! - a number - Direct send to the server holding that id
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Target};
//!
//! let msg = codec::decode(r#"{"context":"Chat","data":[1,2],"target":"b"}"#).unwrap();
//! assert_eq!(msg.target, Target::BroadcastAll);
//!
//! let line = codec::encode(&msg).unwrap();
//! assert_eq!(&line[..], b"{\"context\":\"Chat\",\"data\":[1,2],\"target\":\"b\"}\n");
//! ```

pub mod codec;
pub mod info;
pub mod message;

pub use codec::{decode, encode, ProtocolError, DEFAULT_MAX_LINE_LENGTH};
pub use info::{AdvertisedPort, PeerDescriptor, ServerInfo};
pub use message::{
    Message, PeerId, Target, CONTEXT_CONNECT, CONTEXT_DISCONNECT, CONTEXT_IDENTIFY,
};
