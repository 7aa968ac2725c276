//! Tracing layers for the delivery node
//!
//! [`NodeContextLayer`] copies the active [`NodeContextGuard`] onto every
//! span created inside its scope, so work spawned onto runtime threads keeps
//! the node it belongs to.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{NodeContextData, NodeContextGuard};

/// Layer that attaches node context to spans
#[derive(Debug, Default)]
pub struct NodeContextLayer;

impl NodeContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct NodeContextExtension {
    pub data: NodeContextData,
}

impl<S> Layer<S> for NodeContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let data = NodeContextGuard::current().or_else(|| {
            // inherit from the closest ancestor that has one
            span.scope()
                .skip(1)
                .find_map(|parent| parent.extensions().get::<NodeContextExtension>().cloned())
                .map(|ext| ext.data)
        });
        if let Some(data) = data {
            span.extensions_mut().insert(NodeContextExtension { data });
        }
    }
}
