//! Request correlation table
//!
//! Maps each accepted send's [`RequestId`] to what the node knows about it
//! until a terminal event resolves it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use delivery_core::{ContentTopic, DeliveryEvent, MessageHash, RequestId};
use tracing::debug;

/// Metadata for a send awaiting its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub content_topic: ContentTopic,
    /// Known once the engine has accepted the message
    pub message_hash: Option<MessageHash>,
    pub accepted_at: DateTime<Utc>,
    /// Whether `message_sent` has been seen
    pub sent: bool,
    /// The node stopped while the engine was still answering
    pub abandoned: bool,
}

impl PendingSend {
    pub fn new(content_topic: ContentTopic) -> Self {
        Self {
            content_topic,
            message_hash: None,
            accepted_at: Utc::now(),
            sent: false,
            abandoned: false,
        }
    }
}

/// What to do with an incoming event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Deliver to the host
    Forward,
    /// The request is not pending; swallow the event
    Drop,
}

/// Where a request stands once the engine has accepted its message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// Awaiting its outcome events
    Pending,
    /// The node stopped first; the entry is removed and the caller reports
    /// the error
    Abandoned(PendingSend),
    /// Already resolved by a terminal event
    Resolved,
}

#[derive(Debug, Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingSend>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, request_id: RequestId, pending: PendingSend) {
        self.entries.insert(request_id, pending);
    }

    pub fn get(&self, request_id: &RequestId) -> Option<&PendingSend> {
        self.entries.get(request_id)
    }

    pub fn remove(&mut self, request_id: &RequestId) -> Option<PendingSend> {
        self.entries.remove(request_id)
    }

    /// Record the engine-assigned hash
    pub fn accept(&mut self, request_id: &RequestId, hash: MessageHash) -> Acceptance {
        let Some(pending) = self.entries.get_mut(request_id) else {
            return Acceptance::Resolved;
        };
        pending.message_hash = Some(hash);
        if !pending.abandoned {
            return Acceptance::Pending;
        }
        match self.entries.remove(request_id) {
            Some(pending) => Acceptance::Abandoned(pending),
            None => Acceptance::Resolved,
        }
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply an event to the table
    ///
    /// `message_sent` marks the request but keeps it pending; terminal
    /// events remove it. Events for requests that are not pending are
    /// dropped so a request resolves at most once, and so are events for
    /// abandoned requests. Unknown events carry no correlation and always
    /// pass.
    pub fn resolve(&mut self, event: &DeliveryEvent) -> Resolution {
        let Some(request_id) = event.request_id() else {
            return Resolution::Forward;
        };

        match self.entries.get(request_id) {
            None => return Resolution::Drop,
            Some(pending) if pending.abandoned => return Resolution::Drop,
            Some(_) => {}
        }

        if event.is_terminal() {
            self.entries.remove(request_id);
            return Resolution::Forward;
        }

        match self.entries.get_mut(request_id) {
            Some(pending) => {
                if pending.sent {
                    debug!(request_id = %request_id, "repeated message_sent");
                }
                pending.sent = true;
                Resolution::Forward
            }
            None => Resolution::Drop,
        }
    }

    /// Give up on every pending request
    ///
    /// Requests the engine accepted are removed and returned; the caller
    /// reports them. Requests still waiting on the engine are marked and
    /// left for [`RequestTable::accept`] to hand back once their hash is
    /// known.
    pub fn abandon(&mut self) -> Vec<(RequestId, PendingSend)> {
        let mut accepted = Vec::new();
        for (id, pending) in &mut self.entries {
            if pending.message_hash.is_some() {
                accepted.push(id.clone());
            } else {
                pending.abandoned = true;
            }
        }
        accepted
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
