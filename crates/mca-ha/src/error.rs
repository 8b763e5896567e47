//! Coordination error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from leases and the leader coordinator.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// A leader-only operation was attempted on a follower.
    #[error("not the leader; refusing {operation}")]
    NotLeader {
        /// The refused operation.
        operation: String,
    },

    /// The lease backend failed.
    #[error("lease backend error: {0}")]
    Backend(String),

    /// A lease file could not be read, locked or written.
    #[error("lease file {path}: {source}")]
    Io {
        /// Lease file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Coordinator settings are inconsistent.
    #[error("invalid leader configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a running coordinator.
    #[error("leader coordinator already started")]
    AlreadyStarted,

    /// `start` was called outside a Tokio runtime.
    #[error("no Tokio runtime available")]
    NoRuntime,
}

impl CoordinationError {
    /// Whether this is [`CoordinationError::NotLeader`].
    #[must_use]
    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }
}

/// Result type for coordination.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
