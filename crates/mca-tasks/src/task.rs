//! Work abstractions: outcomes and the cancellable task trait.

use crate::error::TaskError;
use crate::handle::TaskContext;
use crate::state::TaskState;

/// What a completion callback receives. Delivered exactly once per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The work returned a value.
    Completed(T),
    /// The work returned an error or panicked.
    Failed(TaskError),
    /// The task was cancelled before starting or honored a cancellation
    /// request while running.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// Map a work result, folding [`TaskError::Cancelled`] into
    /// [`TaskOutcome::Cancelled`].
    pub fn from_result(result: Result<T, TaskError>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(TaskError::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }

    /// The terminal state this outcome corresponds to.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    /// The completed value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed(_) | Self::Cancelled => None,
        }
    }
}

/// A long-running unit of work with cooperative cancellation.
///
/// Implementations call [`TaskContext::checkpoint`] before each unit of work
/// and propagate its error, so cancellation is reported distinctly from
/// completion.
pub trait CancellableTask: Send + 'static {
    /// Value produced on completion.
    type Output: Send + 'static;

    /// Name used in logs and events.
    fn name(&self) -> &str {
        "task"
    }

    /// Execute on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cancelled`] when cancellation was observed, or
    /// another [`TaskError`] on failure.
    fn run(&mut self, ctx: &TaskContext) -> Result<Self::Output, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_error_maps_to_cancelled_outcome() {
        let outcome: TaskOutcome<()> = TaskOutcome::from_result(Err(TaskError::Cancelled));
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(outcome.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_failure_and_value() {
        let failed: TaskOutcome<u8> = TaskOutcome::from_result(Err(TaskError::failed("boom")));
        assert_eq!(failed.state(), TaskState::Failed);
        assert_eq!(failed.into_value(), None);
        assert_eq!(TaskOutcome::from_result(Ok(3)).into_value(), Some(3));
    }
}
