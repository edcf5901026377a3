//! Coordinator side: spawn workers and call into them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │   Coordinator    │   call / emit / init     │      Worker      │
//! │                  │ ───────────────────────▶ │                  │
//! │  WorkerHandle    │        (stdin)           │  Dispatcher      │
//! │  Proxy / Stubs   │                          │  ExportMap       │
//! │  Correlator      │ ◀─────────────────────── │  Bridge          │
//! │                  │  content / call-ret /    │                  │
//! │                  │  emit  (stdout)          │                  │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! Every handle runs three tasks: a writer draining queued envelopes into
//! the child's stdin, a reader settling responses and firing events, and a
//! monitor that waits for the process to end, rejects what is still pending
//! and respawns when asked to.
//!
//! # Example
//!
//! ```ignore
//! use runworker::supervisor::{spawn, SpawnOptions};
//! use serde_json::json;
//!
//! let worker = spawn("demo", SpawnOptions::default()).await?;
//! let sum: i64 = worker.stub(&["add"])?.call_as(vec![json!(2), json!(3)]).await?;
//! worker.terminate();
//! ```

mod cluster;
mod correlator;
mod error;
mod handle;
mod link;
mod options;
mod proxy;

pub use cluster::{Cluster, ClusterEvent};
pub use correlator::{Correlator, Outcome};
pub use error::{RpcError, RpcResult};
pub use handle::{spawn, ExitInfo, Lifecycle, WorkerHandle};
pub use options::{LoadMode, SpawnOptions};
pub use proxy::{CallableKind, OpaqueKind, Proxy, Stub};
