//! Worker-side end of the event bridge.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::events::{check_event_name, EventError, Listeners};
use crate::protocol::Envelope;

/// Item queued for the worker's stdout writer.
pub(crate) enum Outbound {
    Envelope(Envelope),
    /// Completes once everything queued before it has been written.
    Flush(oneshot::Sender<()>),
}

/// Handle given to module code for talking to the coordinator.
///
/// `emit` raises an event on the coordinator's worker handle; `on` listens
/// for events the coordinator sends with `emit_to_worker`.
#[derive(Clone, Debug)]
pub struct Bridge {
    outgoing: mpsc::UnboundedSender<Outbound>,
    listeners: Listeners,
}

impl Bridge {
    pub(crate) fn new(outgoing: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outgoing,
            listeners: Listeners::new(),
        }
    }

    /// Send a custom event to the coordinator.
    ///
    /// Lifecycle names are rejected before anything is queued.
    pub fn emit(&self, event: &str, payload: Value) -> Result<(), EventError> {
        check_event_name(event)?;
        self.emit_unchecked(event, payload)
    }

    /// Listen for an event sent by the coordinator.
    pub fn on<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.listeners.on(event, listener);
    }

    pub(crate) fn emit_unchecked(&self, event: &str, payload: Value) -> Result<(), EventError> {
        self.send(Envelope::emit(event, payload))
    }

    pub(crate) fn send(&self, envelope: Envelope) -> Result<(), EventError> {
        self.outgoing
            .send(Outbound::Envelope(envelope))
            .map_err(|_| EventError::Closed)
    }

    pub(crate) fn fire(&self, event: &str, payload: &Value) -> usize {
        self.listeners.fire(event, payload)
    }

    /// Wait until everything queued so far has reached the transport.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.outgoing.send(Outbound::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}
