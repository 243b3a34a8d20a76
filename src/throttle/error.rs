//! Task settlement errors

use thiserror::Error;

/// Why a queued task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The task was discarded by [`clear`](super::ThrottleQueue::clear) before dispatch.
    #[error("task was cancelled before dispatch")]
    Cancelled,

    /// The operation ran and returned its own error.
    #[error("{0}")]
    Operation(E),

    /// The settlement lost its producer without an outcome: the queue was dropped
    /// with the task still pending, or the operation panicked.
    #[error("task was abandoned without settling")]
    Abandoned,
}

impl<E> TaskError<E> {
    /// Whether this is a deliberate cancellation rather than a failure
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Take the operation's error, if that is what this is
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}
