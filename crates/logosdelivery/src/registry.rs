//! Handle registry
//!
//! A handle given to the host is a node ID dressed up as a pointer. Node IDs
//! are never reused, so a stale or duplicated handle misses the map instead
//! of reaching freed memory.

use std::ffi::c_void;
use std::sync::LazyLock;

use dashmap::DashMap;
use delivery_core::{DeliveryError, DeliveryResult};
use delivery_node::Context;

static NODES: LazyLock<DashMap<u64, Context>> = LazyLock::new(DashMap::new);

/// Register `ctx` and return its handle
pub fn register(ctx: Context) -> *mut c_void {
    let id = ctx.id();
    NODES.insert(id, ctx);
    std::ptr::without_provenance_mut(id as usize)
}

fn key(handle: *const c_void) -> Option<u64> {
    match handle.addr() {
        0 => None,
        addr => Some(addr as u64),
    }
}

/// The live node behind `handle`
pub fn lookup(handle: *const c_void) -> DeliveryResult<Context> {
    key(handle)
        .and_then(|id| NODES.get(&id).map(|entry| entry.value().clone()))
        .ok_or(DeliveryError::InvalidHandle)
}

/// Remove `handle`; later lookups fail
pub fn release(handle: *const c_void) -> Option<Context> {
    key(handle).and_then(|id| NODES.remove(&id)).map(|(_, ctx)| ctx)
}
