//! Line-oriented reading and writing over a byte stream.
//!
//! Reading happens on the connection's own task. Writing is owned by a
//! dedicated writer task fed through a bounded queue, so fan-out from other
//! connections never waits on a slow socket.

use bytes::{Bytes, BytesMut};
use switchboard_protocol::{codec, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::traits::TransportError;

const READ_CHUNK: usize = 4096;

/// Reads newline-delimited lines from a stream.
pub struct LineReader<R> {
    reader: R,
    buffer: BytesMut,
    max_line_length: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Create a line reader.
    #[must_use]
    pub fn new(reader: R, max_line_length: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_line_length,
        }
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` once the stream has ended. A final line without a
    /// trailing newline is still returned. Cancel safe.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a framing error. Check
    /// [`TransportError::is_fatal`]: a non-UTF-8 line is consumed and
    /// reading may continue.
    pub async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            if let Some(line) = codec::decode_from(&mut self.buffer, self.max_line_length)? {
                return Ok(Some(line));
            }

            self.buffer.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }

                let rest = self.buffer.split();
                return String::from_utf8(rest.to_vec())
                    .map(Some)
                    .map_err(|_| ProtocolError::InvalidUtf8.into());
            }
        }
    }
}

/// Delivery errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient is not draining its queue fast enough.
    #[error("Outbox full")]
    Full,

    /// The recipient's connection is gone.
    #[error("Connection closed")]
    Closed,
}

/// Sending side of a connection's write queue.
///
/// Cloning is cheap; the connection is closed once every clone is dropped.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Bytes>,
}

impl Outbox {
    /// Create an outbox and the queue it feeds, without a writer task.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue one encoded line for delivery. Never waits.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is full or the connection has closed.
    pub fn deliver(&self, line: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Spawn a writer task that owns `writer`.
///
/// Each queued line is written once. The task shuts the writer down when
/// the last [`Outbox`] clone is dropped or a write fails.
pub fn spawn_writer<W>(writer: W, capacity: usize) -> (Outbox, JoinHandle<()>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (outbox, rx) = Outbox::channel(capacity);
    let handle = tokio::spawn(write_lines(writer, rx));
    (outbox, handle)
}

async fn write_lines<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.write_all(&line).await {
            warn!(error = %e, "Write failed, closing writer");
            break;
        }
        trace!(bytes = line.len(), "Wrote line");
    }

    rx.close();
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Writer shutdown failed");
    }
}
