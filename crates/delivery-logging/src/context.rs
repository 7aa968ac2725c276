//! Node context injection for multi-node logging
//!
//! A host process may run several nodes side by side. [`NodeContextGuard`]
//! stores the active node in thread-local storage so spans opened inside its
//! scope are tagged with that node.

use std::cell::RefCell;

use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Handle-level node identifier
    pub node_id: u64,
    /// Unique instance ID for this node's lifetime
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread on creation and restores
/// the previous context (if any) on drop.
///
/// # Example
///
/// ```
/// use delivery_logging::context::NodeContextGuard;
///
/// {
///     let _guard = NodeContextGuard::new(7);
///     assert_eq!(NodeContextGuard::current_node_id(), Some(7));
///     tracing::info!("starting node");
/// }
/// assert!(NodeContextGuard::current().is_none());
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Enter the context of `node_id` with a fresh instance ID
    pub fn new(node_id: u64) -> Self {
        Self::with_instance_id(node_id, Uuid::new_v4())
    }

    /// Enter the context of `node_id`, keeping a known instance ID
    pub fn with_instance_id(node_id: u64, instance_id: Uuid) -> Self {
        let previous = Self::current();
        NODE_CONTEXT.with(|ctx| {
            *ctx.borrow_mut() = Some(NodeContextData {
                node_id,
                instance_id,
            })
        });
        Self { previous }
    }

    /// Get the current node context (if any)
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_id() -> Option<u64> {
        Self::current().map(|ctx| ctx.node_id)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
