//! Named custom events carried over the protocol's `emit` command.
//!
//! Both sides use the same rules: a handful of names belong to process
//! lifecycle vocabulary and cannot be sent, and listeners for a name fire in
//! registration order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use thiserror::Error;

/// Event names reserved for process lifecycle notifications.
pub const RESERVED_EVENTS: [&str; 7] = [
    "disconnect",
    "exit",
    "fork",
    "listening",
    "message",
    "online",
    "setup",
];

/// Sent by a worker in deferred load mode once it is ready for `init`.
pub(crate) const ONLINE_EVENT: &str = "online";

/// Channel a worker uses to report a load failure before exiting.
pub const ERROR_EVENT: &str = "error";

/// Errors raised when sending an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The name collides with lifecycle vocabulary.
    #[error("'{0}' is a reserved message keyword")]
    Reserved(String),

    /// The other side is gone.
    #[error("event channel closed")]
    Closed,
}

/// Reject lifecycle names before anything is transmitted.
pub fn check_event_name(name: &str) -> Result<(), EventError> {
    if RESERVED_EVENTS.contains(&name) {
        return Err(EventError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Callback invoked with an event's payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener table keyed by event name. Cloning shares the table.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<HashMap<String, Vec<Listener>>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.into())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Fire every listener registered for `event`; returns how many ran.
    ///
    /// The table lock is released before listeners run, so a listener may
    /// register further listeners.
    pub fn fire(&self, event: &str, payload: &Value) -> usize {
        let listeners: Vec<Listener> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned()
            .unwrap_or_default();

        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }

    /// Number of listeners registered for `event`.
    pub fn count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Listeners").field("events", &names).finish()
    }
}
