//! Newline-delimited JSON framing.
//!
//! Every message is one UTF-8 JSON object terminated by `\n`. There is no
//! length prefix; a line longer than the configured maximum is a framing
//! failure.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::message::Message;

/// Default maximum line length (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed JSON or a payload of the wrong shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Line is not valid UTF-8.
    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    /// Line exceeds the maximum length.
    #[error("Line of {0} bytes exceeds maximum length")]
    LineTooLong(usize),
}

impl ProtocolError {
    /// Whether the stream can no longer be read after this error.
    ///
    /// A malformed line is dropped and reading continues; an oversized
    /// line leaves the stream without a usable line boundary.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::LineTooLong(_))
    }
}

/// Decode one line into a message.
///
/// # Errors
///
/// Returns an error if the line is not a JSON object of the message shape.
pub fn decode(line: &str) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Interpret an opaque payload as `T`.
///
/// A missing payload is treated as JSON `null`.
///
/// # Errors
///
/// Returns an error if the payload does not have the shape of `T`.
pub fn decode_data<T: DeserializeOwned>(data: Option<&RawValue>) -> Result<T, ProtocolError> {
    let text = data.map_or("null", RawValue::get);
    Ok(serde_json::from_str(text)?)
}

/// Encode a message as a single line, including the trailing newline.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Try to split one line off a read buffer, advancing it if successful.
///
/// Returns `Ok(Some(line))` without the line terminator (`\n` or `\r\n`),
/// or `Ok(None)` if no complete line is buffered yet.
///
/// # Errors
///
/// Returns [`ProtocolError::LineTooLong`] once a line exceeds
/// `max_line_length`, and [`ProtocolError::InvalidUtf8`] after consuming a
/// line that is not UTF-8.
pub fn decode_from(
    buf: &mut BytesMut,
    max_line_length: usize,
) -> Result<Option<String>, ProtocolError> {
    let Some(end) = buf.iter().position(|b| *b == b'\n') else {
        if buf.len() > max_line_length {
            return Err(ProtocolError::LineTooLong(buf.len()));
        }
        return Ok(None);
    };

    if end > max_line_length {
        return Err(ProtocolError::LineTooLong(end));
    }

    let mut line = buf.split_to(end + 1);
    line.truncate(end);
    if line.last() == Some(&b'\r') {
        line.truncate(end - 1);
    }

    String::from_utf8(line.to_vec())
        .map(Some)
        .map_err(|_| ProtocolError::InvalidUtf8)
}
