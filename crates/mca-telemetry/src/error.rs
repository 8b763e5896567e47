//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while installing the log subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The base level did not parse as a filter.
    #[error("invalid log level '{level}': {message}")]
    InvalidLevel {
        /// Level as configured.
        level: String,
        /// Parser message.
        message: String,
    },

    /// A per-target directive did not parse.
    #[error("invalid log directive '{directive}': {message}")]
    InvalidDirective {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// The file target's directory could not be created.
    #[error("failed to create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
