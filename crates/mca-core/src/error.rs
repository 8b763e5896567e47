//! Core error types.

use thiserror::Error;

/// Errors from the container, state store and caches.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No instance or factory is registered under the key.
    #[error("service not registered: {0}")]
    NotRegistered(String),

    /// The registered service is not of the requested type.
    #[error("service {key} is not a {expected}")]
    TypeMismatch {
        /// Service key.
        key: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// A factory resolved its own key while being materialized.
    #[error("cyclic factory dependency on service {0}")]
    CyclicFactory(String),

    /// A state-change callback tried to mutate the store that is notifying it.
    #[error("state store updated from inside its own change callback (key: {0})")]
    ReentrantUpdate(String),

    /// A pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Source pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
