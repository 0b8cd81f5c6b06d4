//! Error types reported to completion handlers and suspended routines.

use std::any::Any;
use thiserror::Error;

/// Errors surfaced by frames, handlers and timers.
#[derive(Debug, Error)]
pub enum Error {
    /// The awaited operation was cancelled before it completed.
    #[error("operation aborted")]
    OperationAborted,

    /// The coroutine stack for a new frame could not be allocated.
    #[error("failed to allocate a {size} byte coroutine stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// The spawned routine panicked before returning.
    #[error("spawned routine panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Returns true if this error reports a cancelled operation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::OperationAborted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
