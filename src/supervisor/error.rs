//! Coordinator-side error types.

use std::io;

use thiserror::Error;

use crate::events::EventError;
use crate::ids::EntropyError;
use crate::marshal::PlainError;

/// Result type for coordinator operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur while driving a worker.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to read from worker stdout.
    #[error("failed to read from worker: {0}")]
    ReadFailed(#[source] io::Error),

    /// Failed to serialize a value for the worker.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// A result could not be read as the requested type.
    #[error("failed to deserialize result: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// The worker reported that its module failed to load.
    #[error("worker '{module_path}' failed to load: {error}")]
    LoadFailed {
        module_path: String,
        error: PlainError,
    },

    /// The readiness handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The worker speaks another version of the value contract.
    #[error("protocol version mismatch: expected {expected}, worker announced {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// The worker process exited while the call was outstanding.
    #[error("worker '{module_path}' exited (code {code:?})")]
    WorkerExited {
        module_path: String,
        code: Option<i32>,
    },

    /// The handle is already dead; nothing was sent.
    #[error("worker '{module_path}' not available")]
    WorkerDead { module_path: String },

    /// The call failed inside the worker.
    #[error("worker error: {0}")]
    Remote(PlainError),

    /// A response arrived for an id that is not pending.
    #[error("trying to resolve an answered function (id {id})")]
    ProtocolViolation { id: String },

    /// Event name collides with lifecycle vocabulary.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The call path does not name a callable export.
    #[error("no callable export at '{0}'")]
    NoSuchPath(String),

    /// No correlation id could be drawn.
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    /// Response channel was closed (internal error).
    #[error("response channel closed unexpectedly")]
    ChannelClosed,
}

impl RpcError {
    /// The worker's error record, for failures raised inside the worker.
    pub fn remote(&self) -> Option<&PlainError> {
        match self {
            Self::Remote(error) | Self::LoadFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Check if this error indicates the worker is gone.
    pub fn is_worker_exited(&self) -> bool {
        matches!(
            self,
            Self::WorkerExited { .. } | Self::WorkerDead { .. } | Self::ChannelClosed
        )
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RpcError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
