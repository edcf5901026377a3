//! Serving `call` and `emit` envelopes against a loaded module.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::io::{AsyncBufRead, Lines};
use tracing::{debug, trace, warn};

use super::bridge::Bridge;
use super::error::ServeError;
use crate::export::{Args, CallResult, Invocation, Registry};
use crate::marshal::PlainError;
use crate::protocol::{Envelope, Message};

type InFlight = BoxFuture<'static, (String, Vec<String>, CallResult)>;

/// Receive loop of a loaded worker.
///
/// Calls start in arrival order. Synchronous exports answer before the next
/// line is read; deferred ones join the in-flight set and answer whenever
/// they finish, so completions are not ordered.
pub(crate) struct Dispatcher {
    module_path: String,
    registry: Registry,
    bridge: Bridge,
    in_flight: FuturesUnordered<InFlight>,
}

impl Dispatcher {
    pub(crate) fn new(module_path: String, registry: Registry, bridge: Bridge) -> Self {
        Self {
            module_path,
            registry,
            bridge,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Serve until the coordinator closes the input.
    pub(crate) async fn run<R>(&mut self, lines: &mut Lines<R>) -> Result<(), ServeError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            tokio::select! {
                line = lines.next_line() => match line.map_err(ServeError::Read)? {
                    Some(line) => self.handle_line(&line)?,
                    None => {
                        debug!(
                            in_flight = self.in_flight.len(),
                            "coordinator closed the channel"
                        );
                        return Ok(());
                    }
                },
                Some((id, path, outcome)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.reply(id, &path, outcome)?;
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) -> Result<(), ServeError> {
        let envelope = match Envelope::from_line(line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                trace!("ignoring foreign line");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "malformed envelope");
                return Ok(());
            }
        };

        match envelope.message {
            Message::Call {
                id,
                function_path,
                arguments,
            } => self.dispatch(id, function_path, arguments),
            Message::Emit {
                event_name,
                payload,
            } => {
                let fired = self.bridge.fire(&event_name, &payload);
                debug!(event = %event_name, fired, "event from coordinator");
                Ok(())
            }
            Message::Init { module_path } => {
                warn!(
                    requested = %module_path,
                    loaded = %self.module_path,
                    "module already loaded, ignoring init"
                );
                Ok(())
            }
            other => {
                warn!(?other, "unexpected message for a worker");
                Ok(())
            }
        }
    }

    fn dispatch(
        &mut self,
        id: String,
        path: Vec<String>,
        arguments: Vec<serde_json::Value>,
    ) -> Result<(), ServeError> {
        debug!(%id, path = %path.join("."), "call");

        let Some(invocable) = self.registry.get(&path) else {
            let error = PlainError::new(format!(
                "worker {} has no function '{}'",
                self.module_path,
                path.join(".")
            ))
            .with_field("code", "NO_SUCH_FUNCTION");
            return self.reply(id, &path, Err(error));
        };

        match invocable.invoke(Args::new(arguments)) {
            Invocation::Ready(outcome) => self.reply(id, &path, outcome),
            Invocation::Pending(future) => {
                self.in_flight
                    .push(future.map(move |outcome| (id, path, outcome)).boxed());
                Ok(())
            }
        }
    }

    fn reply(&self, id: String, path: &[String], outcome: CallResult) -> Result<(), ServeError> {
        if let Err(error) = &outcome {
            warn!(%id, path = %path.join("."), error = %error, "call failed");
        }
        self.bridge
            .send(Envelope::call_return(id, outcome))
            .map_err(|_| ServeError::Disconnected)
    }
}
