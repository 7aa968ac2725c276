//! The node engine seam
//!
//! The control plane drives an engine through [`DeliveryEngine`]. The
//! engine reports message outcomes through the [`EventEmitter`] it is
//! handed on start; it never holds the node context itself.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use delivery_core::{
    ContentTopic, DeliveryError, DeliveryEvent, MessageHash, NodeConfig, OutboundMessage,
    RequestId,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by an engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the configuration or operation
    #[error("rejected: {0}")]
    Rejected(String),

    /// Operation requires a started engine
    #[error("engine is not running")]
    NotRunning,

    /// Operation requires a stopped engine
    #[error("engine is already running")]
    AlreadyRunning,

    /// Message exceeds the engine's size limit
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Network-level failure
    #[error("network error: {0}")]
    Network(String),
}

impl From<EngineError> for DeliveryError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::PayloadTooLarge { .. } => DeliveryError::invalid_field("payload", e.to_string()),
            other => DeliveryError::Engine(other.to_string()),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Sink for events produced by the engine
///
/// Cloneable and cheap; emitting after the node has gone away is a no-op.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn Fn(DeliveryEvent) -> bool + Send + Sync>,
}

impl EventEmitter {
    /// Emitter calling `sink` for each event; `sink` returns false once closed
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(DeliveryEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Emitter feeding an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeliveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(move |event| tx.send(event).is_ok()), rx)
    }

    /// Emit an event; returns false if nobody is listening any more
    pub fn emit(&self, event: DeliveryEvent) -> bool {
        (self.sink)(event)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

/// A messaging engine driven by a node context
///
/// Calls for one context are never made concurrently for subscriptions, and
/// `start`/`stop` never overlap each other.
#[async_trait]
pub trait DeliveryEngine: Send + Sync + 'static {
    /// Bring the engine up with `config`, reporting outcomes to `events`
    async fn start(&self, config: &NodeConfig, events: EventEmitter) -> EngineResult<()>;

    /// Shut the engine down; stopping a stopped engine succeeds
    async fn stop(&self) -> EngineResult<()>;

    async fn subscribe(&self, topic: &ContentTopic) -> EngineResult<()>;

    async fn unsubscribe(&self, topic: &ContentTopic) -> EngineResult<()>;

    /// Accept a message for delivery and return its hash
    ///
    /// Outcomes for `request_id` are reported later through the emitter.
    async fn send(&self, request_id: &RequestId, message: OutboundMessage)
    -> EngineResult<MessageHash>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: DeliveryError = EngineError::NotRunning.into();
        assert_eq!(err, DeliveryError::Engine("engine is not running".to_string()));

        let err: DeliveryError = EngineError::PayloadTooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, DeliveryError::InvalidField { field: "payload", .. }));
    }

    #[test]
    fn test_channel_emitter() {
        let (emitter, mut rx) = EventEmitter::channel();
        let event = DeliveryEvent::MessageSent {
            request_id: "r".into(),
            message_hash: "0x1".into(),
        };
        assert!(emitter.emit(event.clone()));
        assert_eq!(tokio_test::block_on(rx.recv()), Some(event.clone()));

        drop(rx);
        assert!(!emitter.emit(event));
    }
}
