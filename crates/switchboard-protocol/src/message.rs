//! The message envelope exchanged between game servers and the hub.

use crate::codec::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Number, Value};

/// Identifier the hub assigns to each connected server.
pub type PeerId = u32;

/// Context of the confirmation sent after a successful identify.
pub const CONTEXT_IDENTIFY: &str = "Identify";
/// Context of a presence announcement for a joining server.
pub const CONTEXT_CONNECT: &str = "Connect";
/// Context of a presence announcement for a leaving server.
pub const CONTEXT_DISCONNECT: &str = "Disconnect";

const TAG_IDENTIFY: &str = "i";
const TAG_BROADCAST_ALL: &str = "b";
const TAG_BROADCAST_GROUP: &str = "g";

/// Where a message should be delivered.
///
/// On the wire this is either one of the string tags `i`, `b`, `g` or a
/// JSON number. Anything else decodes as [`Target::Unrecognized`] so the
/// router can log and drop it instead of failing the whole line.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// `"i"`: identify request, or a control message from the hub.
    Identify,
    /// `"b"`: every identified server except the sender.
    BroadcastAll,
    /// `"g"`: every identified server in the sender's group except the sender.
    BroadcastGroup,
    /// A numeric peer id, kept exactly as received.
    Direct(Number),
    /// Any other string tag or JSON shape.
    Unrecognized(Value),
}

impl Target {
    /// Create a direct target for a peer id.
    #[must_use]
    pub fn direct(id: PeerId) -> Self {
        Target::Direct(Number::from(id))
    }

    /// Resolve a direct target to the peer id it addresses.
    ///
    /// Fractional numbers are truncated toward zero. Returns `None` for
    /// non-direct targets and for numbers that cannot name a peer
    /// (zero, negative, or out of range).
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        let Target::Direct(number) = self else {
            return None;
        };

        if let Some(value) = number.as_u64() {
            return PeerId::try_from(value).ok().filter(|id| *id > 0);
        }

        number
            .as_f64()
            .map(f64::trunc)
            .filter(|value| *value >= 1.0 && *value <= f64::from(PeerId::MAX))
            .map(|value| value as PeerId)
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::Unrecognized(Value::Null)
    }
}

impl From<Value> for Target {
    fn from(value: Value) -> Self {
        match value {
            Value::String(tag) => match tag.as_str() {
                TAG_IDENTIFY => Target::Identify,
                TAG_BROADCAST_ALL => Target::BroadcastAll,
                TAG_BROADCAST_GROUP => Target::BroadcastGroup,
                _ => Target::Unrecognized(Value::String(tag)),
            },
            Value::Number(number) => Target::Direct(number),
            other => Target::Unrecognized(other),
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Target::Identify => serializer.serialize_str(TAG_IDENTIFY),
            Target::BroadcastAll => serializer.serialize_str(TAG_BROADCAST_ALL),
            Target::BroadcastGroup => serializer.serialize_str(TAG_BROADCAST_GROUP),
            Target::Direct(number) => number.serialize(serializer),
            Target::Unrecognized(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Target::from)
    }
}

/// A protocol message.
///
/// `data` is kept as raw JSON text. The hub only looks inside it for
/// identify requests; everywhere else it is relayed byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Free-form context chosen by the sender.
    #[serde(default)]
    pub context: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    /// Delivery target.
    #[serde(default)]
    pub target: Target,
    /// Sender id claimed by the client. Informational only, never relayed.
    #[serde(default, skip_serializing)]
    pub sender: Option<Number>,
}

impl Message {
    /// Create a message carrying `data` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` cannot be serialized.
    pub fn new<T: Serialize + ?Sized>(
        context: impl Into<String>,
        data: &T,
        target: Target,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            context: context.into(),
            data: Some(serde_json::value::to_raw_value(data)?),
            target,
            sender: None,
        })
    }

    /// Create the confirmation that tells a server its assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn identify_confirmation(id: PeerId) -> Result<Self, ProtocolError> {
        Self::new(CONTEXT_IDENTIFY, &id, Target::Identify)
    }

    /// Create a presence announcement for a server that joined a group.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn connect<T: Serialize + ?Sized>(descriptor: &T) -> Result<Self, ProtocolError> {
        Self::new(CONTEXT_CONNECT, descriptor, Target::Identify)
    }

    /// Create a presence announcement for a server that left.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn disconnect(id: PeerId) -> Result<Self, ProtocolError> {
        Self::new(CONTEXT_DISCONNECT, &id, Target::Identify)
    }

    /// Raw JSON text of the payload, `null` when absent.
    #[must_use]
    pub fn data_json(&self) -> &str {
        self.data.as_deref().map_or("null", RawValue::get)
    }
}
