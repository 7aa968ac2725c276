//! # Delivery Node
//!
//! The control plane a host drives one messaging node through.
//!
//! This crate provides [`Context`], which ties together:
//! - the lifecycle state machine ([`NodeState`])
//! - the command dispatcher, completing every command exactly once
//! - the event multiplexer and its single standing callback
//! - request correlation between `send` and later delivery events
//!
//! Networking is behind the [`DeliveryEngine`] trait. [`LoopbackEngine`]
//! is an in-process implementation that delivers to itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use delivery_node::{Completion, Context, EncodedEvent, LoopbackEngine};
//!
//! # async fn demo() -> delivery_core::DeliveryResult<()> {
//! let ctx = Context::create(
//!     r#"{"mode":"Core","clusterId":42,"numShards":8,"entryNodes":[]}"#,
//!     Arc::new(LoopbackEngine::default()),
//!     tokio::runtime::Handle::current(),
//! )?;
//!
//! ctx.set_event_callback(Some(Arc::new(|event: &EncodedEvent| println!("{}", event.json))))?;
//! ctx.start(Completion::new("start", |outcome| println!("started: {outcome:?}")))?;
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod context;
pub mod correlation;
pub mod engine;
pub mod loopback;
pub mod multiplexer;
pub mod state;

pub use completion::{CommandOutcome, Completion};
pub use context::{ABANDONED_ON_STOP, Context};
pub use correlation::{Acceptance, PendingSend, RequestTable, Resolution};
pub use engine::{DeliveryEngine, EngineError, EngineResult, EventEmitter};
pub use loopback::{LoopbackEngine, LoopbackOptions, StoredMessage};
pub use multiplexer::{EncodedEvent, EventCallback, EventSlot};
pub use state::{Command, NodeState};
