//! MCA Crypto - trust verification for extension artifacts.
//!
//! This crate provides:
//! - Streaming SHA-256 digests of artifact files
//! - Detached `.sig` signature files (base64)
//! - RSA (PKCS#1 v1.5) and ECDSA P-256 trusted keys loaded from PEM
//! - A [`TrustPolicy`] that decides `Verified`, `Unverified` or rejection
//!
//! The signed message is the raw 32-byte digest of the artifact.
//!
//! # Example
//!
//! ```no_run
//! use mca_crypto::{TrustConfig, TrustPolicy, TrustStatus};
//!
//! let policy = TrustPolicy::new(&TrustConfig::advisory(Vec::new())).unwrap();
//! let verdict = policy.verify(std::path::Path::new("extensions/good.wasm")).unwrap();
//! assert_eq!(verdict.status, TrustStatus::Unverified);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod digest;
mod error;
mod keys;
mod signature;
mod trust;
mod verifier;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use digest::{DIGEST_BLOCK_SIZE, Sha256Digest, digest_file, read_and_digest};
pub use error::{TrustError, TrustResult};
pub use keys::{KeyAlgorithm, KeyFingerprint, TrustedKey};
pub use signature::{SIGNATURE_SUFFIX, encode_signature, read_signature, signature_path};
pub use trust::{TrustConfig, TrustPolicy, TrustStatus, TrustVerdict, VerifiedArtifact, verify};
pub use verifier::SignatureVerifier;
