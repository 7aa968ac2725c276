//! Outbound messages and the identifiers that track them

use base64::{Engine as _, engine::general_purpose::STANDARD};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DeliveryError, DeliveryResult};
use crate::topic::{ContentTopic, PubsubTopic};

/// Largest payload the node accepts for sending
pub const MAX_PAYLOAD_BYTES: usize = 150 * 1024;

/// Correlation token minted when a send is accepted
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Mint a fresh request ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Deterministic hash identifying a message on the network
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHash(String);

impl MessageHash {
    /// Hash of the routing topic, payload, content topic and timestamp
    pub fn compute(
        pubsub_topic: &PubsubTopic,
        payload: &[u8],
        content_topic: &ContentTopic,
        timestamp_ns: i64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(pubsub_topic.to_string().as_bytes());
        hasher.update(payload);
        hasher.update(content_topic.as_str().as_bytes());
        hasher.update(&timestamp_ns.to_be_bytes());
        Self(format!("0x{}", hex::encode(hasher.finalize().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for MessageHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A message handed to the node for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content_topic: ContentTopic,
    pub payload: Vec<u8>,
    /// When set the engine need not retain the message for later retrieval
    pub ephemeral: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutboundMessage {
    content_topic: Option<String>,
    payload: Option<String>,
    ephemeral: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOutboundMessage<'a> {
    content_topic: &'a str,
    payload: String,
    ephemeral: bool,
}

impl OutboundMessage {
    pub fn new(content_topic: ContentTopic, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            content_topic,
            payload: payload.into(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Decode and validate a message envelope
    pub fn from_json(json: &str) -> DeliveryResult<Self> {
        let raw: RawOutboundMessage = serde_json::from_str(json)?;
        let content_topic = raw
            .content_topic
            .ok_or(DeliveryError::MissingField("contentTopic"))?;
        let content_topic = ContentTopic::new(content_topic)?;
        let payload = raw.payload.ok_or(DeliveryError::MissingField("payload"))?;
        let payload = STANDARD.decode(payload.as_bytes())?;
        Ok(Self {
            content_topic,
            payload,
            ephemeral: raw.ephemeral.unwrap_or(false),
        })
    }

    /// Encode to the envelope, base64-encoding the payload
    pub fn to_json(&self) -> DeliveryResult<String> {
        let wire = WireOutboundMessage {
            content_topic: self.content_topic.as_str(),
            payload: STANDARD.encode(&self.payload),
            ephemeral: self.ephemeral,
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

/// Body returned to the host when a send is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub request_id: RequestId,
    pub message_hash: MessageHash,
}

impl SendReceipt {
    pub fn to_json(&self) -> DeliveryResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
