//! Extension error types.

use std::path::PathBuf;

use mca_core::CoreError;
use thiserror::Error;

/// A module failed static capability analysis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// One or more imports are outside the allow-list.
    ///
    /// Every offending name is listed, including the fail-closed markers
    /// `<component-model>`, `<dynamic-linking>` and `<malformed>`.
    #[error("disallowed imports: {}", .offending.join(", "))]
    Disallowed {
        /// Sorted, de-duplicated offending names.
        offending: Vec<String>,
    },
}

impl CapabilityError {
    /// The offending names.
    #[must_use]
    pub fn offending(&self) -> &[String] {
        match self {
            Self::Disallowed { offending } => offending,
        }
    }
}

/// Result type for capability scanning.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// An extension passed its checks but could not be made callable.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The embedded manifest is not valid.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The module does not export the entry-point function.
    #[error("missing entry point: {0}")]
    MissingEntryPoint(String),

    /// The runtime refused to instantiate the module.
    #[error("instantiation failed: {0}")]
    Instantiate(String),

    /// The runtime panicked while instantiating the module.
    #[error("instantiation panicked: {0}")]
    Panicked(String),

    /// A declared dependency is neither loaded nor satisfied by the host.
    #[error("unsatisfied dependency: {0}")]
    UnsatisfiedDependency(String),
}

/// Result type for loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// A call into an instantiated extension failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallError(pub String);

/// Registry-level errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The extension directory could not be read.
    #[error("cannot read extension directory {path}: {source}")]
    Discovery {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No extension is registered under the name.
    #[error("extension not loaded: {0}")]
    NotLoaded(String),

    /// The extension's entry point returned an error or trapped.
    #[error("extension {name} failed: {source}")]
    Invocation {
        /// Extension name.
        name: String,
        /// Runtime error.
        #[source]
        source: CallError,
    },

    /// The extension returned output that is not a valid result document.
    #[error("extension {name} returned invalid output: {source}")]
    InvalidOutput {
        /// Extension name.
        name: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The analysis context could not be resolved from the container.
    #[error(transparent)]
    Context(#[from] CoreError),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
