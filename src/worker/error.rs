//! Worker-side error types.

use std::io;

use thiserror::Error;

use crate::marshal::PlainError;

/// Reasons a worker stops serving.
#[derive(Error, Debug)]
pub enum ServeError {
    /// The module could not be loaded. Already reported to the coordinator.
    #[error("failed to load module: {0}")]
    LoadFailed(PlainError),

    /// Failed to read from the coordinator.
    #[error("failed to read from coordinator: {0}")]
    Read(#[source] io::Error),

    /// The stdout writer is gone.
    #[error("coordinator channel closed")]
    Disconnected,

    /// The coordinator closed the channel before sending `init`.
    #[error("coordinator closed the channel before init")]
    NoInit,

    /// Could not start the worker runtime.
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[source] io::Error),
}
