//! Trust verification error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while establishing trust in an extension artifact.
#[derive(Debug, Error)]
pub enum TrustError {
    /// The detached signature file does not exist.
    #[error("missing signature: {path}")]
    MissingSignature {
        /// Expected location of the signature file.
        path: PathBuf,
    },

    /// The signature file is not valid base64.
    #[error("invalid signature encoding in {path}: {reason}")]
    InvalidEncoding {
        /// Path to the signature file.
        path: PathBuf,
        /// Decoder error.
        reason: String,
    },

    /// Verification was required but no trusted key is configured.
    #[error("no trusted public keys configured")]
    NoTrustedKeys,

    /// No trusted key validates the signature.
    #[error("signature not valid for any trusted key")]
    UntrustedSignature,

    /// A configured public key could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// The artifact or its signature could not be read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl TrustError {
    /// Short, stable reason string used in diagnostics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingSignature { .. } => "missing signature",
            Self::InvalidEncoding { .. } => "invalid signature encoding",
            Self::NoTrustedKeys => "no trusted public keys configured",
            Self::UntrustedSignature => "untrusted signature",
            Self::InvalidKey(_) => "invalid public key",
            Self::Io { .. } => "unreadable artifact",
        }
    }
}

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;
