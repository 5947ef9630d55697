//! Beacon wire format — the announcement datagram.
//!
//! One UDP datagram carries one compact JSON object:
//!
//! ```text
//! {"uuid":"<id>","name":"<display name>"}
//! ```
//!
//! The datagram boundary is the message boundary. There is no length
//! prefix, no version and no authentication. Field names are part of the
//! protocol and must not change. Decoders keep unknown fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key of the sender's id in the announcement object.
pub const UUID_KEY: &str = "uuid";
/// Key of the sender's display name in the announcement object.
pub const NAME_KEY: &str = "name";
/// Locally injected key listing the observed source address.
/// Never sent on the wire.
pub const ADDRESSES_KEY: &str = "addresses";

/// Peer attributes: every decoded field except the id, plus local additions.
pub type Attributes = serde_json::Map<String, Value>;

/// The outbound announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("announcement has no usable uuid")]
    MissingId,
    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Announcement {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    /// Serialize to the compact datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A decoded datagram: the sender's id and its remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAnnouncement {
    pub id: String,
    pub attributes: Attributes,
}

/// Decode a datagram payload.
///
/// Anything that is not a JSON object decodes to an empty field set. The
/// `uuid` field is removed from the attributes and must be a non-empty
/// string, otherwise the datagram is rejected with [`WireError::MissingId`].
pub fn decode(data: &[u8]) -> Result<DecodedAnnouncement, WireError> {
    let mut attributes = match serde_json::from_slice::<Value>(data) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => Attributes::new(),
    };

    match attributes.remove(UUID_KEY) {
        Some(Value::String(id)) if !id.is_empty() => Ok(DecodedAnnouncement { id, attributes }),
        _ => Err(WireError::MissingId),
    }
}
