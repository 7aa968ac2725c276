//! Event multiplexer
//!
//! Engine events and node-synthesized events funnel through one channel
//! into a single dispatch task, so the host's event callback is never
//! entered from two threads at once. The standing callback lives in an
//! [`EventSlot`]; each event goes to the callback installed at the moment
//! it is dispatched.

use std::fmt;
use std::sync::Arc;

use delivery_core::DeliveryEvent;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// An event together with its wire encoding
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    pub event: DeliveryEvent,
    pub json: String,
}

/// Standing event callback
pub type EventCallback = Arc<dyn Fn(&EncodedEvent) + Send + Sync>;

/// Holder for the single registered event callback
#[derive(Default)]
pub struct EventSlot {
    current: RwLock<Option<EventCallback>>,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, returning the one it replaces
    pub fn set(&self, callback: Option<EventCallback>) -> Option<EventCallback> {
        std::mem::replace(&mut *self.current.write(), callback)
    }

    pub fn clear(&self) -> Option<EventCallback> {
        self.set(None)
    }

    /// Snapshot of the callback to dispatch to
    pub fn current(&self) -> Option<EventCallback> {
        self.current.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }
}

impl fmt::Debug for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Where an event entering the multiplexer came from
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Dispatch {
    /// Emitted by the engine; subject to correlation
    Engine(DeliveryEvent),
    /// Produced by the node for a request it already resolved
    Resolved(DeliveryEvent),
}

/// Run the dispatch loop until shutdown, channel close, or `dispatch`
/// reports the node is gone
pub(crate) fn spawn<F>(
    runtime: &Handle,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    mut shutdown_rx: broadcast::Receiver<()>,
    dispatch: F,
) -> JoinHandle<()>
where
    F: Fn(Dispatch) -> bool + Send + 'static,
{
    runtime.spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                item = rx.recv() => {
                    let Some(item) = item else { break };
                    if !dispatch(item) {
                        break;
                    }
                }
            }
        }
        debug!("event multiplexer exited");
    })
}
