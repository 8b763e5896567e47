//! Task error types.

use thiserror::Error;

/// Why a work unit did not complete.
///
/// [`TaskError::Cancelled`] is expected control flow: a task that honors a
/// cancellation request returns it from [`TaskContext::checkpoint`] and the
/// executor reports the task as cancelled, not failed.
///
/// [`TaskContext::checkpoint`]: crate::TaskContext::checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The work unit returned an error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The work unit panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The work unit observed a cancellation request.
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Whether this is the cancellation condition.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors constructing or using an executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No tokio runtime is available on the calling thread.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// The worker count must be at least one.
    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(usize),
}

/// Result type for executor construction.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
