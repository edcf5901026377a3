//! # runworker
//!
//! Call functions exported by a child process as if they were local.
//!
//! ## Architecture
//!
//! A worker process declares its exported surface, announces it once, and
//! serves calls. The coordinator mirrors the announcement as a tree of call
//! stubs:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Worker module (declared Export)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [export::map]
//! ┌─────────────────────────────────────────────────────────┐
//! │         ExportNode tree  +  path → closure registry     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [protocol: content envelope]
//! ┌─────────────────────────────────────────────────────────┐
//! │            Proxy (stubs) in the coordinator             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [call / call-ret, correlated by id]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Dispatcher in the worker                │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The same executable plays both roles; see [`role`].

pub mod config;
pub mod events;
pub mod export;
pub mod ids;
pub mod logging;
pub mod marshal;
pub mod protocol;
pub mod role;
pub mod supervisor;
pub mod worker;

pub use events::EventError;
pub use export::{Args, Export, Json};
pub use marshal::PlainError;
pub use role::{is_worker, role, Role};
pub use supervisor::{spawn, LoadMode, RpcError, RpcResult, SpawnOptions, WorkerHandle};
pub use worker::{Bridge, ModuleTable};
