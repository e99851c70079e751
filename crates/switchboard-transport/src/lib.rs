//! # switchboard-transport
//!
//! Connection plumbing for the Switchboard relay hub.
//!
//! - **Transport** - accepts connections (`TcpTransport`)
//! - **Authorization** - decides which remote addresses may connect
//! - **Lines** - reads newline-delimited lines from a stream, and a writer
//!   task that owns the write half of each connection
//!
//! ```rust,ignore
//! use switchboard_transport::{LineReader, Transport};
//!
//! let accepted = transport.accept().await?;
//! let (read_half, write_half) = tokio::io::split(accepted.stream);
//! let outbox = switchboard_transport::spawn_writer(write_half, 1024);
//! let mut lines = LineReader::new(read_half, 64 * 1024);
//! while let Some(line) = lines.next_line().await? {
//!     // Process line
//! }
//! ```

pub mod auth;
pub mod lines;
pub mod tcp;
pub mod traits;

pub use auth::{is_private_or_loopback, AllowEntry, AllowList, Authorizer};
pub use lines::{spawn_writer, DeliveryError, LineReader, Outbox};
pub use tcp::TcpTransport;
pub use traits::{Accepted, Transport, TransportError};
