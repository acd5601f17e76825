use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoordError;
use crate::types::PeerId;

/// `apiName` of acknowledgement payloads.
pub const ACK_API_NAME: &str = "ACK";

/// Point-to-point message wrapper, published on the receiver's private topic.
///
/// `payload` is the hex-encoded ciphertext for data messages and
/// `{"apiName":"ACK"}` for acknowledgements. An ACK reuses the uuid of the
/// message it acknowledges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,
    pub uuid: String,
    pub sender: PeerId,
    pub receiver: PeerId,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// New data envelope carrying `ciphertext` (hex on the wire).
    pub fn new(sender: PeerId, receiver: PeerId, ciphertext: &[u8]) -> Self {
        Self {
            timestamp: Utc::now(),
            uuid: uuid::Uuid::new_v4().to_string(),
            sender,
            receiver,
            payload: serde_json::Value::String(hex::encode(ciphertext)),
        }
    }

    /// Acknowledgement of `original`, addressed back to its sender.
    pub fn ack_for(original: &Envelope) -> Self {
        Self {
            timestamp: Utc::now(),
            uuid: original.uuid.clone(),
            sender: original.receiver.clone(),
            receiver: original.sender.clone(),
            payload: serde_json::json!({ "apiName": ACK_API_NAME }),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.payload
            .get("apiName")
            .and_then(|v| v.as_str())
            .is_some_and(|name| name == ACK_API_NAME)
    }

    /// Ciphertext bytes of a data envelope.
    pub fn ciphertext(&self) -> Result<Vec<u8>, CoordError> {
        let hex_str = self.payload.as_str().ok_or_else(|| {
            CoordError::Deserialization("envelope payload is not a ciphertext string".into())
        })?;
        hex::decode(hex_str).map_err(|e| CoordError::Deserialization(format!("bad hex payload: {e}")))
    }

    /// Content hash used for duplicate suppression.
    ///
    /// Stable across republishes and across the private-topic and
    /// durable-log paths, which carry the same envelope.
    pub fn dedup_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.as_bytes());
        hasher.update(b":");
        hasher.update(self.uuid.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoordError> {
        serde_json::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoordError> {
        serde_json::from_slice(data).map_err(Into::into)
    }
}
