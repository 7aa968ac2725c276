//! Exported C functions
//!
//! Every command validates its callback first: without one there is nowhere
//! to report to, so the call returns `RET_MISSING_CALLBACK` and does nothing
//! else. After that, every call reports through its callback exactly once.
//! Failures detected before any work is handed off are reported inline on
//! the calling thread and the call returns `RET_ERR`.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::Arc;

use delivery_core::{DeliveryError, DeliveryResult, NodeConfig, StatusCode};
use delivery_node::{Completion, Context, EncodedEvent, EventCallback, LoopbackEngine};
use tracing::{debug, warn};

use crate::callback::{FfiCallback, HostCallback};
use crate::{registry, runtime};

/// Borrow a host string for the duration of the call
///
/// # Safety
///
/// `ptr` is null or points to a NUL-terminated string that outlives `'a`.
unsafe fn host_str<'a>(ptr: *const c_char, field: &'static str) -> DeliveryResult<&'a str> {
    if ptr.is_null() {
        return Err(DeliveryError::invalid_field(field, "null pointer"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| DeliveryError::InvalidUtf8(field))
}

fn build_node(config_json: &str) -> DeliveryResult<Context> {
    let config = NodeConfig::from_json(config_json)?;
    runtime::init_logging(config.log_level());
    let handle = runtime::handle()?;
    Ok(Context::new(config, Arc::new(LoopbackEngine::default()), handle))
}

/// Shared path of every handle-taking command
///
/// `issue` gets the node and a completion bound to the host callback; it
/// returns `Err` only after it has already reported the failure.
fn command<F>(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    name: &'static str,
    issue: F,
) -> c_int
where
    F: FnOnce(Context, Completion) -> DeliveryResult<()>,
{
    let Some(callback) = HostCallback::new(callback, user_data) else {
        warn!(command = name, "Command issued without a callback");
        return StatusCode::MissingCallback.as_raw();
    };
    let node = match registry::lookup(ctx) {
        Ok(node) => node,
        Err(e) => {
            debug!(command = name, "Command issued on an unknown handle");
            callback.fail(&e);
            return StatusCode::Err.as_raw();
        }
    };
    match issue(node, callback.completion(name)) {
        Ok(()) => StatusCode::Ok.as_raw(),
        Err(_) => StatusCode::Err.as_raw(),
    }
}

/// Like [`command`], with a string argument decoded before the node is touched
///
/// # Safety
///
/// `arg` is null or a NUL-terminated string valid for the call.
unsafe fn command_with<F>(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    name: &'static str,
    arg: *const c_char,
    field: &'static str,
    issue: F,
) -> c_int
where
    F: FnOnce(Context, &str, Completion) -> DeliveryResult<()>,
{
    let arg = unsafe { host_str(arg, field) };
    command(ctx, callback, user_data, name, move |node, completion| match arg {
        Ok(arg) => issue(node, arg, completion),
        Err(e) => {
            completion.fail(e.clone());
            Err(e)
        }
    })
}

/// Create a node from a JSON config
///
/// Returns the node handle, or null when `callback` is null or creation
/// failed. The callback reports the outcome either way.
///
/// # Safety
///
/// `config_json` is null or a NUL-terminated string valid for the call;
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_create_node(
    config_json: *const c_char,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> *mut c_void {
    let Some(callback) = HostCallback::new(callback, user_data) else {
        return std::ptr::null_mut();
    };
    let created = unsafe { host_str(config_json, "configJson") }.and_then(build_node);
    match created {
        Ok(node) => {
            debug!(node_id = node.id(), "Handle issued");
            let handle = registry::register(node);
            callback.succeed("");
            handle
        }
        Err(e) => {
            warn!(error = %e, "Node creation failed");
            callback.fail(&e);
            std::ptr::null_mut()
        }
    }
}

/// Start the node
///
/// # Safety
///
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_start_node(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> c_int {
    command(ctx, callback, user_data, "start", |node, completion| {
        node.start(completion)
    })
}

/// Stop the node
///
/// # Safety
///
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_stop_node(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> c_int {
    command(ctx, callback, user_data, "stop", |node, completion| {
        node.stop(completion)
    })
}

/// Destroy the node
///
/// The handle is invalid as soon as this returns. The callback fires once
/// every in-flight command has reported; no event follows it.
///
/// # Safety
///
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_destroy(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(callback) = HostCallback::new(callback, user_data) else {
        return StatusCode::MissingCallback.as_raw();
    };
    let Some(node) = registry::release(ctx) else {
        callback.fail(&DeliveryError::InvalidHandle);
        return StatusCode::Err.as_raw();
    };
    match node.destroy(callback.completion("destroy")) {
        Ok(()) => StatusCode::Ok.as_raw(),
        Err(_) => StatusCode::Err.as_raw(),
    }
}

/// Subscribe to a content topic
///
/// # Safety
///
/// `content_topic` is null or a NUL-terminated string valid for the call;
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_subscribe(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    content_topic: *const c_char,
) -> c_int {
    unsafe {
        command_with(
            ctx,
            callback,
            user_data,
            "subscribe",
            content_topic,
            "contentTopic",
            |node, topic, completion| node.subscribe(topic, completion),
        )
    }
}

/// Unsubscribe from a content topic
///
/// # Safety
///
/// `content_topic` is null or a NUL-terminated string valid for the call;
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_unsubscribe(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    content_topic: *const c_char,
) -> c_int {
    unsafe {
        command_with(
            ctx,
            callback,
            user_data,
            "unsubscribe",
            content_topic,
            "contentTopic",
            |node, topic, completion| node.unsubscribe(topic, completion),
        )
    }
}

/// Send a message
///
/// On acceptance the callback receives `{"requestId":..,"messageHash":..}`.
///
/// # Safety
///
/// `message_json` is null or a NUL-terminated string valid for the call;
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_send(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
    message_json: *const c_char,
) -> c_int {
    unsafe {
        command_with(
            ctx,
            callback,
            user_data,
            "send",
            message_json,
            "messageJson",
            |node, message, completion| node.send(message, completion),
        )
    }
}

/// Install or replace the event callback; null removes it
///
/// Events arrive with `RET_OK` and the event JSON, one at a time.
///
/// # Safety
///
/// `callback` accepts `user_data` from any thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn logosdelivery_set_event_callback(
    ctx: *mut c_void,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) {
    let node = match registry::lookup(ctx) {
        Ok(node) => node,
        Err(e) => {
            warn!(error = %e, "Event callback set on an unknown handle");
            return;
        }
    };
    let events = HostCallback::new(callback, user_data).map(|host| {
        Arc::new(move |event: &EncodedEvent| host.succeed(&event.json)) as EventCallback
    });
    if let Err(e) = node.set_event_callback(events) {
        warn!(node_id = node.id(), error = %e, "Event callback rejected");
    }
}
