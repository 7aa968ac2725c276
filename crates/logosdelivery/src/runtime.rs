//! Library-owned runtime and logging
//!
//! Callbacks and events run on the worker threads of one multi-thread tokio
//! runtime shared by every node in the process. It is built on first use
//! and lives until the process exits.

use std::sync::{Mutex, Once, OnceLock};

use delivery_core::{DeliveryError, DeliveryResult, LogLevel};
use delivery_logging::{DeliverySubscriberBuilder, LogConfig, WorkerGuard};
use tokio::runtime::{Builder, Handle, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static RUNTIME_INIT: Mutex<()> = Mutex::new(());
static LOGGING: Once = Once::new();
static LOG_FILES: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Handle to the shared runtime, building it if needed
pub fn handle() -> DeliveryResult<Handle> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }

    let _init = RUNTIME_INIT
        .lock()
        .map_err(|_| DeliveryError::Resource("runtime initialization poisoned".to_string()))?;
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("logosdelivery-worker")
        .build()
        .map_err(|e| DeliveryError::Resource(format!("cannot build runtime: {e}")))?;
    let handle = runtime.handle().clone();
    let _ = RUNTIME.set(runtime);
    Ok(handle)
}

/// Install the global subscriber once, at the first node's log level
///
/// `RUST_LOG` overrides the level. The console format and an optional log
/// directory come from the `LOGOSDELIVERY_LOG_*` variables. A subscriber the
/// host installed itself is left in place.
pub fn init_logging(level: LogLevel) {
    LOGGING.call_once(|| {
        let installed = DeliverySubscriberBuilder::new()
            .with_config(LogConfig::from_env(level.as_filter()))
            .try_init();
        match installed {
            Ok(Some(guard)) => {
                if let Ok(mut slot) = LOG_FILES.lock() {
                    *slot = Some(guard);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Keeping existing tracing subscriber"),
        }
    });
}
