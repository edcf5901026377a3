//! The coordinator's outbound half of one worker connection.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::correlator::Correlator;
use super::error::{RpcError, RpcResult};
use crate::events::check_event_name;
use crate::protocol::Envelope;

/// Shared by a handle and every stub built from its export tree.
#[derive(Debug)]
pub(crate) struct Link {
    correlator: Correlator,
    outgoing: mpsc::UnboundedSender<Envelope>,
}

impl Link {
    pub(crate) fn new(module_path: impl Into<String>, outgoing: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            correlator: Correlator::new(module_path),
            outgoing,
        }
    }

    pub(crate) fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub(crate) fn module_path(&self) -> &str {
        self.correlator.module_path()
    }

    fn dead(&self) -> RpcError {
        RpcError::WorkerDead {
            module_path: self.module_path().to_string(),
        }
    }

    /// Issue a call and wait for its matching `call-ret`.
    ///
    /// A dead handle fails here without sending anything.
    pub(crate) async fn call(&self, function_path: Vec<String>, arguments: Vec<Value>) -> RpcResult<Option<Value>> {
        let (id, response) = self.correlator.register()?;
        debug!(%id, path = %function_path.join("."), "call");

        if self
            .outgoing
            .send(Envelope::call(id.clone(), function_path, arguments))
            .is_err()
        {
            self.correlator.abandon(&id);
            return Err(self.dead());
        }

        response.await?
    }

    /// Send a custom event to the worker.
    pub(crate) fn emit(&self, event: &str, payload: Value) -> RpcResult<()> {
        check_event_name(event)?;
        if !self.correlator.is_alive() {
            return Err(self.dead());
        }
        self.send(Envelope::emit(event, payload))
    }

    /// Queue an envelope without checks.
    pub(crate) fn send(&self, envelope: Envelope) -> RpcResult<()> {
        self.outgoing.send(envelope).map_err(|_| self.dead())
    }
}

/// Drain queued envelopes into the worker's stdin.
pub(crate) async fn write_loop<W>(input: W, mut rx: mpsc::UnboundedReceiver<Envelope>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(input);
    while let Some(envelope) = rx.recv().await {
        let line = match envelope.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %RpcError::SerializeFailed(e), "dropping envelope");
                continue;
            }
        };
        trace!(cmd = envelope.command(), "send");
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            debug!(error = %RpcError::WriteFailed(e), "worker input closed");
            break;
        }
    }
}
