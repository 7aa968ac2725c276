//! Correlation of host commands with the log lines they produce
//!
//! Every command entering a node gets a [`CommandCorrelation`]. Its fields
//! are recorded on the command span so log lines from the command, the
//! engine call it makes and the events it later triggers can be joined on
//! `command_id` and `request_id`; sends add `message_hash` once the engine
//! has accepted them.

use tracing::field::Empty;
use uuid::Uuid;

/// Correlation data for one host command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCorrelation {
    /// Unique per command invocation
    pub command_id: Uuid,
    /// Node the command targets
    pub node_id: u64,
    /// Command name, one of the [`spans`] constants
    pub command: &'static str,
    /// Request ID minted for a send
    pub request_id: Option<String>,
}

impl CommandCorrelation {
    pub fn new(node_id: u64, command: &'static str) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            node_id,
            command,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Open the command span with every correlation field declared
    pub fn span(&self) -> tracing::Span {
        let span = tracing::info_span!(
            "command",
            command = self.command,
            node_id = self.node_id,
            command_id = Empty,
            request_id = Empty,
            message_hash = Empty,
            content_topic = Empty,
            state = Empty,
        );
        span.record_correlation(self);
        span
    }
}

/// Helper trait to attach correlation data to tracing spans
pub trait CorrelationExt {
    /// Record correlation fields on a span
    fn record_correlation(&self, ctx: &CommandCorrelation);
}

impl CorrelationExt for tracing::Span {
    fn record_correlation(&self, ctx: &CommandCorrelation) {
        self.record(fields::COMMAND_ID, ctx.command_id.to_string());
        if let Some(ref request_id) = ctx.request_id {
            self.record(fields::REQUEST_ID, request_id.as_str());
        }
    }
}

/// Names of the command span fields filled in after it opens
pub mod fields {
    pub const COMMAND_ID: &str = "command_id";
    pub const REQUEST_ID: &str = "request_id";
    pub const MESSAGE_HASH: &str = "message_hash";
    pub const CONTENT_TOPIC: &str = "content_topic";
    pub const STATE: &str = "state";
}

/// Standard span names, one per host command
pub mod spans {
    pub const CREATE_NODE: &str = "create_node";
    pub const START_NODE: &str = "start_node";
    pub const STOP_NODE: &str = "stop_node";
    pub const DESTROY: &str = "destroy";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const SEND: &str = "send";
    pub const SET_EVENT_CALLBACK: &str = "set_event_callback";
    pub const DISPATCH_EVENT: &str = "dispatch_event";
}
