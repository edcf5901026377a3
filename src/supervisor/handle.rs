//! Spawning and supervising one worker process.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::error::{RpcError, RpcResult};
use super::link::{write_loop, Link};
use super::options::{LoadMode, SpawnOptions};
use super::proxy::{Proxy, Stub};
use crate::events::{Listeners, ERROR_EVENT, ONLINE_EVENT};
use crate::marshal::PlainError;
use crate::protocol::{Envelope, ExportNode, Message, PROTOCOL_VERSION};
use crate::role::{MODULE_ENV, ROLE_ENV, WORKER_ROLE};

/// Buffered lifecycle notifications per handle lineage.
const LIFECYCLE_CAPACITY: usize = 64;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit status, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Whether the exit followed [`WorkerHandle::terminate`].
    pub requested: bool,
}

/// Notifications about a worker and its replacements.
///
/// A handle's feed is shared with every handle respawned from it.
#[derive(Debug, Clone)]
pub enum Lifecycle {
    /// The process is gone and every pending call has been rejected.
    Exited { pid: Option<u32>, info: ExitInfo },
    /// A `call-ret` arrived for an id that was not pending.
    ProtocolViolation { pid: Option<u32>, id: String },
    /// A replacement worker is up.
    Respawned(WorkerHandle),
    /// Starting the replacement failed.
    RespawnFailed(PlainError),
}

#[derive(Default)]
struct Control {
    requested: AtomicBool,
    stop: Notify,
}

impl Control {
    fn terminate(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.stop.notify_one();
        }
    }

    fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// State carried from a worker to its replacements.
#[derive(Clone)]
struct Lineage {
    listeners: Listeners,
    lifecycle: broadcast::Sender<Lifecycle>,
    generation: u32,
}

struct Inner {
    pid: Option<u32>,
    generation: u32,
    link: Arc<Link>,
    proxy: Proxy,
    listeners: Listeners,
    lifecycle: broadcast::Sender<Lifecycle>,
    control: Arc<Control>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.control.terminate();
    }
}

/// Coordinator-side handle to a running worker.
///
/// Clones share the worker. Dropping the last clone terminates it.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<Inner>,
}

/// Start a worker for `module_path` and wait for its exports.
///
/// Resolves once the worker has announced its export tree. Fails when the
/// executable cannot be started, when the module fails to load, or when the
/// worker exits or announces another protocol version before the handshake.
pub async fn spawn(module_path: impl Into<String>, options: SpawnOptions) -> RpcResult<WorkerHandle> {
    let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
    let lineage = Lineage {
        listeners: Listeners::new(),
        lifecycle,
        generation: 0,
    };
    launch(module_path.into(), options, lineage).await
}

fn launch(module_path: String, options: SpawnOptions, lineage: Lineage) -> BoxFuture<'static, RpcResult<WorkerHandle>> {
    async move {
        let program = options.resolve_program()?;

        let mut child = {
            let mut command = Command::new(&program);
            command
                .args(&options.args)
                .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .env(ROLE_ENV, WORKER_ROLE)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);
            match options.load_mode {
                LoadMode::Eager => command.env(MODULE_ENV, &module_path),
                LoadMode::Deferred => command.env_remove(MODULE_ENV),
            };
            command.spawn().map_err(RpcError::SpawnFailed)?
        };
        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(RpcError::SpawnFailed(io::Error::other(
                    "worker stdio not captured",
                )))
            }
        };
        info!(?pid, module = %module_path, program = %program.display(), "worker spawned");

        let (outgoing, queued) = mpsc::unbounded_channel();
        let link = Arc::new(Link::new(module_path.clone(), outgoing));
        let control = Arc::new(Control::default());
        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(write_loop(stdin, queued));
        let reader = tokio::spawn(
            Reader {
                pid,
                link: link.clone(),
                listeners: lineage.listeners.clone(),
                lifecycle: lineage.lifecycle.clone(),
                control: control.clone(),
                load_mode: options.load_mode,
                ready: Some(ready_tx),
                load_error: None,
                init_sent: false,
            }
            .run(stdout),
        );
        tokio::spawn(monitor(
            child,
            reader,
            Monitor {
                pid,
                module_path,
                options,
                lineage: lineage.clone(),
                link: link.clone(),
                control: control.clone(),
                exit: exit_tx,
            },
        ));

        let tree = match ready_rx.await {
            Ok(Ok(tree)) => tree,
            Ok(Err(e)) => {
                control.terminate();
                return Err(e);
            }
            Err(_) => {
                control.terminate();
                return Err(RpcError::Handshake(
                    "worker stopped before announcing its exports".into(),
                ));
            }
        };

        let proxy = Proxy::build(&tree, &link);
        debug!(?pid, stubs = proxy.stubs().len(), "worker ready");

        Ok(WorkerHandle {
            inner: Arc::new(Inner {
                pid,
                generation: lineage.generation,
                link,
                proxy,
                listeners: lineage.listeners,
                lifecycle: lineage.lifecycle,
                control,
                exit: exit_rx,
            }),
        })
    }
    .boxed()
}

/// Consumes the worker's stdout.
struct Reader {
    pid: Option<u32>,
    link: Arc<Link>,
    listeners: Listeners,
    lifecycle: broadcast::Sender<Lifecycle>,
    control: Arc<Control>,
    load_mode: LoadMode,
    /// Taken when the export tree arrives.
    ready: Option<oneshot::Sender<RpcResult<ExportNode>>>,
    load_error: Option<PlainError>,
    init_sent: bool,
}

impl Reader {
    async fn run<R>(mut self, stdout: R) -> Self
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match Envelope::from_line(&line) {
                    Ok(Some(envelope)) => self.handle(envelope),
                    Ok(None) => trace!(pid = ?self.pid, "ignoring foreign line"),
                    Err(e) => warn!(pid = ?self.pid, error = %e, "malformed envelope"),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!(pid = ?self.pid, error = %RpcError::ReadFailed(e), "worker output closed");
                    break;
                }
            }
        }
        self
    }

    fn handle(&mut self, envelope: Envelope) {
        let cmd = envelope.command();
        trace!(pid = ?self.pid, cmd, "recv");
        match envelope.message {
            Message::CallReturn { id, error, result } => {
                let outcome = match error {
                    Some(error) => Err(RpcError::Remote(error)),
                    None => Ok(result),
                };
                if let Err(violation) = self.link.correlator().settle(&id, outcome) {
                    error!(pid = ?self.pid, error = %violation, "protocol violation");
                    let _ = self.lifecycle.send(Lifecycle::ProtocolViolation { pid: self.pid, id });
                }
            }
            Message::Content { version, export_tree } => {
                let Some(ready) = self.ready.take() else {
                    warn!(pid = ?self.pid, "duplicate export announcement ignored");
                    return;
                };
                let announced = if version == PROTOCOL_VERSION {
                    Ok(export_tree)
                } else {
                    Err(RpcError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        found: version,
                    })
                };
                if ready.send(announced).is_err() {
                    debug!(pid = ?self.pid, "spawn abandoned, stopping worker");
                    self.control.terminate();
                }
            }
            Message::Emit { event_name, payload } => self.on_emit(event_name, payload),
            Message::Init { .. } | Message::Call { .. } => {
                warn!(pid = ?self.pid, cmd, "unexpected command from worker");
            }
        }
    }

    fn on_emit(&mut self, event_name: String, payload: Value) {
        let handshaking = self.ready.is_some();

        if handshaking && event_name == ONLINE_EVENT && self.load_mode == LoadMode::Deferred {
            if !self.init_sent {
                self.init_sent = true;
                if let Err(e) = self.link.send(Envelope::init(self.link.module_path())) {
                    warn!(pid = ?self.pid, error = %e, "cannot send init");
                }
            }
            return;
        }

        if handshaking && event_name == ERROR_EVENT {
            self.load_error = Some(PlainError::from_value(payload));
            return;
        }

        let fired = self.listeners.fire(&event_name, &payload);
        debug!(pid = ?self.pid, event = %event_name, listeners = fired, "event from worker");
    }
}

struct Monitor {
    pid: Option<u32>,
    module_path: String,
    options: SpawnOptions,
    lineage: Lineage,
    link: Arc<Link>,
    control: Arc<Control>,
    exit: watch::Sender<Option<ExitInfo>>,
}

/// Waits for the process to end, settles what is left and respawns.
async fn monitor(mut child: Child, reader: JoinHandle<Reader>, ctx: Monitor) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = ctx.control.stop.notified() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            debug!(pid = ?ctx.pid, "terminating worker");
            if let Err(e) = child.start_kill() {
                debug!(pid = ?ctx.pid, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(pid = ?ctx.pid, error = %e, "cannot read worker exit status");
            None
        }
    };
    let requested = ctx.control.requested();

    // Everything the worker wrote before exiting is settled first.
    let reader = reader.await.ok();
    let rejected = ctx.link.correlator().fail_all(|| RpcError::WorkerExited {
        module_path: ctx.module_path.clone(),
        code,
    });
    info!(
        pid = ?ctx.pid,
        module = %ctx.module_path,
        ?code,
        requested,
        rejected,
        "worker exited"
    );

    let mut announced = false;
    if let Some(mut reader) = reader {
        match reader.ready.take() {
            Some(ready) => {
                let failure = match reader.load_error.take() {
                    Some(error) => RpcError::LoadFailed {
                        module_path: ctx.module_path.clone(),
                        error,
                    },
                    None => RpcError::WorkerExited {
                        module_path: ctx.module_path.clone(),
                        code,
                    },
                };
                let _ = ready.send(Err(failure));
            }
            None => announced = true,
        }
    }

    let info = ExitInfo { code, requested };
    ctx.exit.send_replace(Some(info));
    let _ = ctx.lineage.lifecycle.send(Lifecycle::Exited { pid: ctx.pid, info });

    if !(ctx.options.respawn && announced && !requested) {
        return;
    }

    info!(module = %ctx.module_path, "respawning worker");
    let lineage = Lineage {
        generation: ctx.lineage.generation + 1,
        ..ctx.lineage.clone()
    };
    let lifecycle = ctx.lineage.lifecycle;
    let module_path = ctx.module_path.clone();
    match launch(ctx.module_path, ctx.options, lineage).await {
        Ok(handle) => {
            let pid = handle.pid();
            if lifecycle.send(Lifecycle::Respawned(handle)).is_err() {
                // The only handle went down with the message.
                warn!(
                    module = %module_path,
                    ?pid,
                    "respawned worker has no lifecycle subscriber, stopping it"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "respawn failed");
            let _ = lifecycle.send(Lifecycle::RespawnFailed(PlainError::marshal(&e)));
        }
    }
}

impl WorkerHandle {
    /// OS process id, if the process was still known at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn module_path(&self) -> &str {
        self.inner.link.module_path()
    }

    /// False once the process has exited and its pending calls were rejected.
    pub fn is_alive(&self) -> bool {
        self.inner.link.correlator().is_alive()
    }

    /// Mirror of the worker's exports.
    pub fn proxy(&self) -> &Proxy {
        &self.inner.proxy
    }

    /// How many replacements preceded this worker.
    pub fn respawns(&self) -> u32 {
        self.inner.generation
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.link.correlator().pending()
    }

    /// Stub for the callable export at `path`.
    pub fn stub<S: AsRef<str>>(&self, path: &[S]) -> RpcResult<Stub> {
        self.inner
            .proxy
            .at(path)
            .and_then(Proxy::stub)
            .cloned()
            .ok_or_else(|| {
                let joined: Vec<&str> = path.iter().map(AsRef::as_ref).collect();
                RpcError::NoSuchPath(joined.join("."))
            })
    }

    /// Call the export at `path`.
    pub async fn call<S: AsRef<str>>(&self, path: &[S], args: Vec<Value>) -> RpcResult<Option<Value>> {
        self.stub(path)?.call(args).await
    }

    /// Stop the worker. Calling it again has no effect.
    ///
    /// A requested exit is never respawned.
    pub fn terminate(&self) {
        self.inner.control.terminate();
    }

    /// Listen for a custom event raised by the worker.
    ///
    /// Listeners stay registered on respawned replacements.
    pub fn on<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.listeners.on(event, listener);
    }

    /// Raise a custom event inside the worker.
    pub fn emit_to_worker(&self, event: &str, payload: Value) -> RpcResult<()> {
        self.inner.link.emit(event, payload)
    }

    /// Subscribe to exit, respawn and protocol notifications.
    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    /// Wait until the process has exited and its calls were settled.
    pub async fn wait_for_exit(&self) -> ExitInfo {
        let mut exit = self.inner.exit.clone();
        let info = exit.wait_for(Option::is_some).await.map(|info| *info);
        info.ok().flatten().unwrap_or(ExitInfo {
            code: None,
            requested: self.inner.control.requested(),
        })
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.inner.pid)
            .field("module_path", &self.module_path())
            .field("alive", &self.is_alive())
            .field("respawns", &self.inner.generation)
            .finish()
    }
}
