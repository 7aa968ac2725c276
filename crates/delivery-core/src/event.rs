//! Message-lifecycle events delivered to the host
//!
//! Events are a closed set of known variants plus [`DeliveryEvent::Unknown`],
//! which carries any unrecognized object verbatim so newer engines never
//! break older hosts.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DeliveryError, DeliveryResult};
use crate::message::{MessageHash, RequestId};

pub const MESSAGE_SENT: &str = "message_sent";
pub const MESSAGE_ERROR: &str = "message_error";
pub const MESSAGE_PROPAGATED: &str = "message_propagated";

/// An event about a previously accepted send
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    /// The message left this node
    MessageSent {
        request_id: RequestId,
        message_hash: MessageHash,
    },
    /// Delivery failed; terminal for the request
    MessageError {
        request_id: RequestId,
        message_hash: MessageHash,
        error: String,
    },
    /// The network confirmed propagation; terminal for the request
    MessagePropagated {
        request_id: RequestId,
        message_hash: MessageHash,
    },
    /// Unrecognized event type, preserved as received
    Unknown {
        event_type: String,
        fields: Map<String, Value>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    event_type: &'static str,
    request_id: &'a RequestId,
    message_hash: &'a MessageHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl DeliveryEvent {
    /// The `eventType` tag
    pub fn event_type(&self) -> &str {
        match self {
            DeliveryEvent::MessageSent { .. } => MESSAGE_SENT,
            DeliveryEvent::MessageError { .. } => MESSAGE_ERROR,
            DeliveryEvent::MessagePropagated { .. } => MESSAGE_PROPAGATED,
            DeliveryEvent::Unknown { event_type, .. } => event_type,
        }
    }

    /// Request this event is correlated with, if it is a known variant
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            DeliveryEvent::MessageSent { request_id, .. }
            | DeliveryEvent::MessageError { request_id, .. }
            | DeliveryEvent::MessagePropagated { request_id, .. } => Some(request_id),
            DeliveryEvent::Unknown { .. } => None,
        }
    }

    pub fn message_hash(&self) -> Option<&MessageHash> {
        match self {
            DeliveryEvent::MessageSent { message_hash, .. }
            | DeliveryEvent::MessageError { message_hash, .. }
            | DeliveryEvent::MessagePropagated { message_hash, .. } => Some(message_hash),
            DeliveryEvent::Unknown { .. } => None,
        }
    }

    /// Whether this event resolves its request for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryEvent::MessageError { .. } | DeliveryEvent::MessagePropagated { .. }
        )
    }

    /// Decode an event object
    pub fn from_json(json: &str) -> DeliveryResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(fields) = value else {
            return Err(DeliveryError::invalid_field("event", "expected a JSON object"));
        };
        Self::from_fields(fields)
    }

    fn from_fields(fields: Map<String, Value>) -> DeliveryResult<Self> {
        let event_type = string_field(&fields, "eventType")?;
        match event_type.as_str() {
            MESSAGE_SENT => Ok(DeliveryEvent::MessageSent {
                request_id: string_field(&fields, "requestId")?.into(),
                message_hash: string_field(&fields, "messageHash")?.into(),
            }),
            MESSAGE_ERROR => Ok(DeliveryEvent::MessageError {
                request_id: string_field(&fields, "requestId")?.into(),
                message_hash: string_field(&fields, "messageHash")?.into(),
                error: string_field(&fields, "error")?,
            }),
            MESSAGE_PROPAGATED => Ok(DeliveryEvent::MessagePropagated {
                request_id: string_field(&fields, "requestId")?.into(),
                message_hash: string_field(&fields, "messageHash")?.into(),
            }),
            _ => Ok(DeliveryEvent::Unknown { event_type, fields }),
        }
    }

    /// Encode to the event object
    pub fn to_json(&self) -> DeliveryResult<String> {
        let wire = match self {
            DeliveryEvent::MessageSent {
                request_id,
                message_hash,
            } => WireEvent {
                event_type: MESSAGE_SENT,
                request_id,
                message_hash,
                error: None,
            },
            DeliveryEvent::MessageError {
                request_id,
                message_hash,
                error,
            } => WireEvent {
                event_type: MESSAGE_ERROR,
                request_id,
                message_hash,
                error: Some(error),
            },
            DeliveryEvent::MessagePropagated {
                request_id,
                message_hash,
            } => WireEvent {
                event_type: MESSAGE_PROPAGATED,
                request_id,
                message_hash,
                error: None,
            },
            DeliveryEvent::Unknown { fields, .. } => return Ok(serde_json::to_string(fields)?),
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

fn string_field(fields: &Map<String, Value>, name: &'static str) -> DeliveryResult<String> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DeliveryError::invalid_field(name, "expected a string")),
        None => Err(DeliveryError::MissingField(name)),
    }
}
