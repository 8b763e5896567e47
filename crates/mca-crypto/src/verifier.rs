//! Signature verification against a set of trusted keys.

use tracing::{debug, trace};

use crate::digest::Sha256Digest;
use crate::error::{TrustError, TrustResult};
use crate::keys::{KeyFingerprint, TrustedKey};

/// A set of trusted public keys.
///
/// Verification succeeds if any key validates the signature; the order in
/// which keys were added does not affect the result.
///
/// # Example
///
/// ```
/// use mca_crypto::{Sha256Digest, SignatureVerifier};
///
/// let verifier = SignatureVerifier::new();
/// let digest = Sha256Digest::of(b"module");
/// assert!(verifier.verify_digest(&digest, b"sig").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    keys: Vec<TrustedKey>,
}

impl SignatureVerifier {
    /// Create an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Parse every PEM key into a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] for the first key that fails to parse.
    pub fn from_pems<I, S>(pems: I) -> TrustResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut verifier = Self::new();
        for (index, pem) in pems.into_iter().enumerate() {
            let key = TrustedKey::from_pem(pem.as_ref()).map_err(|e| {
                TrustError::InvalidKey(format!("trusted key #{index}: {e}"))
            })?;
            verifier.add_trusted_key(key);
        }
        Ok(verifier)
    }

    /// Add a key to the trusted set.
    pub fn add_trusted_key(&mut self, key: TrustedKey) -> KeyFingerprint {
        let fingerprint = key.fingerprint().clone();
        if !self.keys.iter().any(|k| k.fingerprint() == &fingerprint) {
            self.keys.push(key);
        }
        fingerprint
    }

    /// Number of trusted keys.
    #[must_use]
    pub fn trusted_key_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify that `signature` signs the raw bytes of `digest`.
    ///
    /// Returns the fingerprint of the first key that validates.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::NoTrustedKeys`] if the set is empty, or
    /// [`TrustError::UntrustedSignature`] if no key validates.
    pub fn verify_digest(
        &self,
        digest: &Sha256Digest,
        signature: &[u8],
    ) -> TrustResult<KeyFingerprint> {
        if self.keys.is_empty() {
            return Err(TrustError::NoTrustedKeys);
        }

        for key in &self.keys {
            if key.verifies(digest.as_bytes(), signature) {
                debug!(key = %key.fingerprint(), "Signature verified");
                return Ok(key.fingerprint().clone());
            }
            trace!(key = %key.fingerprint(), "Key did not validate signature");
        }

        Err(TrustError::UntrustedSignature)
    }
}
