//! # Delivery Core
//!
//! Core types, JSON codec and errors for the Logos Delivery control plane.
//!
//! Everything that crosses the host boundary as text is defined here:
//!
//! - [`NodeConfig`]: node configuration, decoded and validated from JSON
//! - [`OutboundMessage`]: a message envelope with a base64 payload
//! - [`DeliveryEvent`]: message-lifecycle events, forward compatible
//! - [`DeliveryError`] and [`StatusCode`]: failures and ABI status values
//!
//! ## Example
//!
//! ```rust
//! use delivery_core::{NodeConfig, NodeMode, OutboundMessage};
//!
//! let config = NodeConfig::from_json(
//!     r#"{"mode":"Core","clusterId":42,"numShards":8,"entryNodes":[]}"#,
//! ).unwrap();
//! assert_eq!(config.mode(), NodeMode::Core);
//!
//! let msg = OutboundMessage::from_json(
//!     r#"{"contentTopic":"/example/1/chat/proto","payload":"SGVsbG8=","ephemeral":false}"#,
//! ).unwrap();
//! assert_eq!(msg.payload, b"Hello");
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod status;
pub mod topic;

pub use config::{LogLevel, NetworkingConfig, NodeConfig, NodeMode, ShardSpec};
pub use error::{DeliveryError, DeliveryResult, ErrorKind};
pub use event::DeliveryEvent;
pub use message::{MAX_PAYLOAD_BYTES, MessageHash, OutboundMessage, RequestId, SendReceipt};
pub use status::StatusCode;
pub use topic::{ContentTopic, ContentTopicParts, PubsubTopic};
