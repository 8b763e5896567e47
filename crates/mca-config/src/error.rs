//! Configuration errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} not found", path.display())]
    NotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// A file exists but could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    ReadError {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A file is larger than the loader accepts.
    #[error("config file {} is {size} bytes, over the {limit} byte limit", path.display())]
    TooLarge {
        /// Offending file.
        path: PathBuf,
        /// Actual size.
        size: u64,
        /// Accepted maximum.
        limit: u64,
    },

    /// TOML did not parse or did not match the schema.
    #[error("failed to parse {origin}: {source}")]
    ParseError {
        /// File path, or a label for the embedded defaults or merged result.
        origin: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A merged value is out of range or inconsistent.
    #[error("invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// An `MCA_*` variable could not be applied.
    #[error("environment variable '{var_name}': {message}")]
    EnvError {
        /// Variable name.
        var_name: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
