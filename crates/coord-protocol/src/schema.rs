/// Wire types of the announcement protocol.
///
/// Announcements are JSON documents published on the coordination topic;
/// "about" requests and responses are JSON-RPC style objects carried inside
/// private envelopes and used as latency probes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::SelfRecord;
use crate::transport::TopicMessage;
use crate::types::{NodeClass, PeerId, ANNOUNCE_API_NAME, ANNOUNCE_API_VERSION};

const JSONRPC_VERSION: &str = "2.0";
const ABOUT_METHOD: &str = "about";

/// A node's self-description, broadcast periodically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub api_name: String,
    pub api_version: String,
    #[serde(rename = "ipfsId")]
    pub node_id: PeerId,
    #[serde(rename = "type", default)]
    pub node_class: NodeClass,
    #[serde(default)]
    pub dial_addrs: Vec<String>,
    #[serde(default)]
    pub is_circuit_relay: bool,
    #[serde(default)]
    pub crypto_addresses: Vec<String>,
    #[serde(default)]
    pub encrypt_pub_key: Option<String>,
    #[serde(default)]
    pub durable_log_id: Option<String>,
    #[serde(default)]
    pub broadcasted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_relay_info: Option<serde_json::Value>,
}

impl Announcement {
    /// Describe this node as it stands now, stamped with the current time.
    pub fn from_self(record: &SelfRecord) -> Self {
        Self {
            api_name: ANNOUNCE_API_NAME.to_string(),
            api_version: ANNOUNCE_API_VERSION.to_string(),
            node_id: record.node_id.clone(),
            node_class: record.node_class,
            dial_addrs: record.dial_addrs.clone(),
            is_circuit_relay: record.circuit_relay,
            crypto_addresses: record.crypto_addresses.clone(),
            encrypt_pub_key: Some(record.public_key.clone()),
            durable_log_id: Some(record.durable_log_id.clone()),
            broadcasted_at: Some(Utc::now()),
            metadata: record.metadata.clone(),
            circuit_relay_info: record.circuit_relay_info.clone(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::CoordError> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

/// A validated announcement received from another node.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAnnouncement {
    pub from: PeerId,
    pub topic: String,
    pub data: Announcement,
}

/// Decode a coordination-topic message.
///
/// Returns `None` (never an error) for anything that is not a well-formed
/// announcement from another node: non-JSON, missing required fields, a
/// foreign `apiName`, our own broadcasts echoed back, or a sender that
/// disagrees with the announced `ipfsId`.
pub fn parse_broadcast(msg: &TopicMessage, self_id: &str) -> Option<InboundAnnouncement> {
    if msg.from == self_id {
        return None;
    }
    let data: Announcement = match serde_json::from_slice(&msg.data) {
        Ok(a) => a,
        Err(e) => {
            tracing::trace!(from = %msg.from, error = %e, "ignoring non-announcement broadcast");
            return None;
        }
    };
    if data.api_name != ANNOUNCE_API_NAME {
        return None;
    }
    if data.node_id != msg.from {
        tracing::debug!(from = %msg.from, claimed = %data.node_id, "announcement sender mismatch");
        return None;
    }
    Some(InboundAnnouncement {
        from: msg.from.clone(),
        topic: msg.topic.clone(),
        data,
    })
}

// ── About probe ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
}

impl AboutRequest {
    /// New request with a fresh `metrics<rand>` correlation id.
    pub fn new() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: format!("metrics{}", rand::random::<u32>()),
            method: ABOUT_METHOD.to_string(),
        }
    }
}

impl Default for AboutRequest {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutResult {
    pub method: String,
    pub value: Announcement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutResponse {
    pub jsonrpc: String,
    pub id: String,
    pub result: AboutResult,
}

impl AboutResponse {
    /// Answer request `id` with `announcement`.
    pub fn new(id: impl Into<String>, announcement: Announcement) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: AboutResult {
                method: ABOUT_METHOD.to_string(),
                value: announcement,
            },
        }
    }
}

/// Decrypted private payload, classified for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum PrivatePayload {
    AboutRequest(AboutRequest),
    AboutResponse(AboutResponse),
    /// Anything else belongs to the application.
    App(Vec<u8>),
}

impl PrivatePayload {
    pub fn classify(plaintext: Vec<u8>) -> Self {
        if let Ok(req) = serde_json::from_slice::<AboutRequest>(&plaintext) {
            if req.method == ABOUT_METHOD {
                return PrivatePayload::AboutRequest(req);
            }
        }
        if let Ok(resp) = serde_json::from_slice::<AboutResponse>(&plaintext) {
            if resp.result.method == ABOUT_METHOD {
                return PrivatePayload::AboutResponse(resp);
            }
        }
        PrivatePayload::App(plaintext)
    }
}
