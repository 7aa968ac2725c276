//! # logosdelivery
//!
//! C ABI for the Logos Delivery control plane, declared in
//! `include/liblogosdelivery.h`.
//!
//! A host creates a node from a JSON config, drives it through
//! start/subscribe/send/unsubscribe/stop/destroy, and receives results
//! through callbacks:
//!
//! - every command reports its outcome through its own callback, exactly once
//! - message-lifecycle events go to the single callback installed with
//!   [`logosdelivery_set_event_callback`]
//!
//! Callbacks run on the library's worker threads unless a command is rejected
//! before any work starts, in which case its callback runs on the calling
//! thread before the function returns `RET_ERR`.

pub mod api;
pub mod callback;
pub mod registry;
pub mod runtime;

use std::ffi::c_int;

use delivery_core::StatusCode;

pub use api::{
    logosdelivery_create_node, logosdelivery_destroy, logosdelivery_send,
    logosdelivery_set_event_callback, logosdelivery_start_node, logosdelivery_stop_node,
    logosdelivery_subscribe, logosdelivery_unsubscribe,
};
pub use callback::{FfiCallback, HostCallback};

pub const RET_OK: c_int = StatusCode::Ok as c_int;
pub const RET_ERR: c_int = StatusCode::Err as c_int;
pub const RET_MISSING_CALLBACK: c_int = StatusCode::MissingCallback as c_int;
