//! Worker side: load a module, announce it, serve calls.
//!
//! A worker is a child process started by [`crate::supervisor::spawn`]. Its
//! `main` detects the role with [`crate::role`] and hands control to [`run`]:
//!
//! ```ignore
//! fn main() -> std::process::ExitCode {
//!     match runworker::role() {
//!         runworker::Role::Worker => runworker::worker::run(modules()),
//!         runworker::Role::Coordinator => coordinator(),
//!     }
//! }
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! ┌────────────┐  module path from env (eager)  ┌─────────────┐
//! │   start    │ ─────────────────────────────▶ │    load     │
//! │            │  emit online → init (deferred) │             │
//! └────────────┘                                └──────┬──────┘
//!                        load error: emit error, exit 1 │ ok
//!                                                       ▼
//!                                   ┌──────────────────────────────┐
//!                                   │ content (once) → serve calls │
//!                                   └──────────────────────────────┘
//! ```
//!
//! Stdout is the protocol channel. Logs go to stderr.

mod bridge;
mod dispatch;
mod error;
mod loader;

use std::env;
use std::process::ExitCode;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

pub use bridge::Bridge;
pub use error::ServeError;
pub use loader::{ModuleFactory, ModuleLoader, ModuleTable};

use bridge::Outbound;
use dispatch::Dispatcher;

use crate::events::{ERROR_EVENT, ONLINE_EVENT};
use crate::export::ExportMap;
use crate::protocol::{Envelope, Message};
use crate::role::MODULE_ENV;

/// Exit status of a worker whose module failed to load.
pub const LOAD_FAILURE_EXIT: u8 = 1;

/// Run the worker role to completion on the process's stdin/stdout.
///
/// Uses a single-threaded runtime: one worker process serves one module
/// from one dispatch loop.
pub fn run<L>(loader: L) -> ExitCode
where
    L: ModuleLoader + 'static,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %ServeError::Runtime(e), "worker cannot start");
            return ExitCode::FAILURE;
        }
    };

    let module_path = env::var(MODULE_ENV).ok().filter(|p| !p.is_empty());
    let outcome = runtime.block_on(serve(
        loader,
        tokio::io::stdin(),
        tokio::io::stdout(),
        module_path,
    ));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(ServeError::LoadFailed(_)) => ExitCode::from(LOAD_FAILURE_EXIT),
        Err(e) => {
            error!(error = %e, "worker stopped");
            ExitCode::FAILURE
        }
    }
}

/// Serve one module over an arbitrary byte channel.
///
/// `module_path` is `Some` in eager load mode. With `None` the worker emits
/// `online` and waits for an `init` envelope.
pub async fn serve<L, R, W>(
    loader: L,
    input: R,
    output: W,
    module_path: Option<String>,
) -> Result<(), ServeError>
where
    L: ModuleLoader,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(output, rx));
    let bridge = Bridge::new(tx);
    let mut lines = BufReader::new(input).lines();

    let outcome = async {
        let module_path = match module_path {
            Some(path) => path,
            None => {
                bridge
                    .emit_unchecked(ONLINE_EVENT, Value::Null)
                    .map_err(|_| ServeError::Disconnected)?;
                wait_for_init(&mut lines, &bridge).await?
            }
        };

        info!(module = %module_path, "loading module");
        let export = match loader.load(&module_path, &bridge).await {
            Ok(export) => export,
            Err(load_error) => {
                error!(module = %module_path, error = %load_error, "module failed to load");
                let payload = serde_json::to_value(&load_error).unwrap_or(Value::Null);
                let _ = bridge.emit_unchecked(ERROR_EVENT, payload);
                return Err(ServeError::LoadFailed(load_error));
            }
        };

        let map = ExportMap::build(&export);
        debug!(
            module = %module_path,
            callables = map.registry.len(),
            "announcing exports"
        );
        bridge
            .send(Envelope::content(map.tree))
            .map_err(|_| ServeError::Disconnected)?;

        Dispatcher::new(module_path, map.registry, bridge.clone())
            .run(&mut lines)
            .await
    }
    .await;

    bridge.flush().await;
    drop(bridge);
    // Module code may keep bridge clones alive; do not wait on them.
    writer.abort();
    outcome
}

async fn wait_for_init<R>(lines: &mut Lines<R>, bridge: &Bridge) -> Result<String, ServeError>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await.map_err(ServeError::Read)? {
        match Envelope::from_line(&line) {
            Ok(Some(Envelope {
                message: Message::Init { module_path },
                ..
            })) => return Ok(module_path),
            Ok(Some(Envelope {
                message: Message::Emit {
                    event_name,
                    payload,
                },
                ..
            })) => {
                bridge.fire(&event_name, &payload);
            }
            Ok(Some(other)) => {
                warn!(cmd = other.command(), "message before init ignored");
            }
            Ok(None) => trace!("ignoring foreign line"),
            Err(e) => warn!(error = %e, "malformed envelope"),
        }
    }
    Err(ServeError::NoInit)
}

/// Drain the outbound queue into the transport, one line per envelope.
async fn write_loop<W>(output: W, mut rx: mpsc::UnboundedReceiver<Outbound>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(output);
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Envelope(envelope) => {
                let line = envelope.to_line()?;
                trace!(cmd = envelope.command(), "send");
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Outbound::Flush(done) => {
                writer.flush().await?;
                let _ = done.send(());
            }
        }
    }
    writer.flush().await
}
