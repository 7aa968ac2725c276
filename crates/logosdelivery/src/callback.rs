//! Host callbacks
//!
//! Wraps the C function pointer and opaque `userData` a host passes with
//! each call. Messages are handed over as a NUL-terminated buffer whose
//! length excludes the terminator; the buffer is only valid during the call.

use std::ffi::{c_char, c_int, c_void};

use delivery_core::{DeliveryError, StatusCode};
use delivery_node::{CommandOutcome, Completion};

/// `typedef void (*FFICallBack)(int callerRet, const char *msg, size_t len, void *userData);`
pub type FfiCallback =
    unsafe extern "C" fn(caller_ret: c_int, msg: *const c_char, len: usize, user_data: *mut c_void);

#[derive(Debug, Clone, Copy)]
struct UserData(*mut c_void);

// SAFETY: userData is opaque to us and only handed back to the host's own
// callback, which the host declares safe to call from any thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// A host callback together with its `userData`
#[derive(Debug, Clone, Copy)]
pub struct HostCallback {
    func: FfiCallback,
    user_data: UserData,
}

impl HostCallback {
    /// `None` when the host passed a null function pointer
    pub fn new(func: Option<FfiCallback>, user_data: *mut c_void) -> Option<Self> {
        func.map(|func| Self {
            func,
            user_data: UserData(user_data),
        })
    }

    /// Invoke with `status` and `msg`
    pub fn invoke(&self, status: StatusCode, msg: &str) {
        let mut buffer = Vec::with_capacity(msg.len() + 1);
        buffer.extend_from_slice(msg.as_bytes());
        buffer.push(0);
        // SAFETY: the pointer was supplied by the host for exactly this
        // signature; `buffer` outlives the call.
        unsafe {
            (self.func)(
                status.as_raw(),
                buffer.as_ptr().cast::<c_char>(),
                msg.len(),
                self.user_data.0,
            );
        }
    }

    pub fn succeed(&self, body: &str) {
        self.invoke(StatusCode::Ok, body);
    }

    pub fn fail(&self, error: &DeliveryError) {
        self.invoke(error.status_code(), &error.to_string());
    }

    /// Report a command outcome
    pub fn report(&self, outcome: CommandOutcome) {
        match outcome {
            Ok(body) => self.succeed(body.as_deref().unwrap_or("")),
            Err(e) => self.fail(&e),
        }
    }

    /// One-shot completion reporting through this callback
    pub fn completion(self, command: &'static str) -> Completion {
        Completion::new(command, move |outcome| self.report(outcome))
    }
}
