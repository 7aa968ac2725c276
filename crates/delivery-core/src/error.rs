//! Error types for the delivery control plane

use thiserror::Error;

use crate::status::StatusCode;

/// Coarse classification of a [`DeliveryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller broke the API contract (missing callback, bad handle, wrong state)
    CallerContract,
    /// Input could not be decoded or failed validation
    Validation,
    /// The node engine rejected or failed an operation
    Engine,
    /// Resources could not be allocated while building a node
    Resource,
    /// Work was cancelled by `destroy`
    Cancelled,
}

/// Every failure that can cross the host boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// A required completion callback was not supplied
    #[error("missing callback")]
    MissingCallback,

    /// The handle does not refer to a live context
    #[error("invalid handle")]
    InvalidHandle,

    /// Command issued in a lifecycle state that does not accept it
    #[error("cannot {command} while node is {state}")]
    InvalidState {
        command: &'static str,
        state: &'static str,
    },

    /// Malformed JSON text
    #[error("malformed JSON: {0}")]
    Json(String),

    /// A required field was absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field was present but its value is unacceptable
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Payload was not valid base64
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    /// Text input was not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Content topic failed validation
    #[error("invalid content topic: {0}")]
    InvalidTopic(String),

    /// The engine rejected or failed an operation
    #[error("engine error: {0}")]
    Engine(String),

    /// Allocation or construction failure
    #[error("resource error: {0}")]
    Resource(String),

    /// Work cancelled because the context was destroyed
    #[error("cancelled: node destroyed")]
    Cancelled,
}

impl DeliveryError {
    /// Taxonomy bucket for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::MissingCallback
            | DeliveryError::InvalidHandle
            | DeliveryError::InvalidState { .. } => ErrorKind::CallerContract,
            DeliveryError::Json(_)
            | DeliveryError::MissingField(_)
            | DeliveryError::InvalidField { .. }
            | DeliveryError::InvalidBase64(_)
            | DeliveryError::InvalidUtf8(_)
            | DeliveryError::InvalidTopic(_) => ErrorKind::Validation,
            DeliveryError::Engine(_) => ErrorKind::Engine,
            DeliveryError::Resource(_) => ErrorKind::Resource,
            DeliveryError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Status code reported to the host for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeliveryError::MissingCallback => StatusCode::MissingCallback,
            _ => StatusCode::Err,
        }
    }

    /// Shorthand for a field validation failure
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        DeliveryError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(e: serde_json::Error) -> Self {
        DeliveryError::Json(e.to_string())
    }
}

impl From<base64::DecodeError> for DeliveryError {
    fn from(e: base64::DecodeError) -> Self {
        DeliveryError::InvalidBase64(e.to_string())
    }
}

/// Result type alias for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DeliveryError::MissingCallback.kind(), ErrorKind::CallerContract);
        assert_eq!(DeliveryError::MissingField("mode").kind(), ErrorKind::Validation);
        assert_eq!(DeliveryError::Engine("x".into()).kind(), ErrorKind::Engine);
        assert_eq!(DeliveryError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(DeliveryError::MissingCallback.status_code(), StatusCode::MissingCallback);
        assert_eq!(DeliveryError::InvalidHandle.status_code(), StatusCode::Err);
    }

    #[test]
    fn test_state_message() {
        let err = DeliveryError::InvalidState {
            command: "send",
            state: "Created",
        };
        assert_eq!(err.to_string(), "cannot send while node is Created");
    }
}
