//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_crypto::prelude::*;` to import all essential types.

pub use crate::{TrustConfig, TrustError, TrustPolicy, TrustResult, TrustStatus, TrustVerdict};

pub use crate::{Sha256Digest, SignatureVerifier, TrustedKey, VerifiedArtifact};
