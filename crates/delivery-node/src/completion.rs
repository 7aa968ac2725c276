//! One-shot command completions
//!
//! A [`Completion`] wraps the callback a host passed with a command and
//! guarantees it runs exactly once: consuming it with [`Completion::complete`]
//! delivers the outcome, and dropping it unused delivers
//! [`DeliveryError::Cancelled`].

use std::fmt;

use delivery_core::DeliveryError;

/// Result of a command: an optional JSON body on success
pub type CommandOutcome = Result<Option<String>, DeliveryError>;

type Callback = Box<dyn FnOnce(CommandOutcome) + Send + 'static>;

/// Exactly-once completion for a host command
pub struct Completion {
    command: &'static str,
    callback: Option<Callback>,
}

impl Completion {
    pub fn new<F>(command: &'static str, callback: F) -> Self
    where
        F: FnOnce(CommandOutcome) + Send + 'static,
    {
        Self {
            command,
            callback: Some(Box::new(callback)),
        }
    }

    /// Deliver the outcome, consuming the completion
    pub fn complete(mut self, outcome: CommandOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }

    pub fn succeed(self) {
        self.complete(Ok(None));
    }

    pub fn fail(self, error: DeliveryError) {
        self.complete(Err(error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            tracing::debug!(command = self.command, "completion dropped, reporting cancellation");
            callback(Err(DeliveryError::Cancelled));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("command", &self.command)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
