//! Signing helpers for tests (`test-support` feature).
//!
//! Produces keys and detached `.sig` files the same way the release signing
//! tool does: the signed message is the raw 32-byte SHA-256 digest.

use std::path::{Path, PathBuf};

use p256::ecdsa::signature::Signer as _;
use p256::pkcs8::EncodePublicKey as _;
use rsa::pkcs8::EncodePublicKey as _;
use rsa::signature::{SignatureEncoding as _, Signer as _};
use sha2::Sha256;

use crate::digest::digest_file;
use crate::error::{TrustError, TrustResult};
use crate::signature::{encode_signature, signature_path};

/// Something that can sign a digest and publish its public key.
pub trait ArtifactSigner {
    /// PEM of the public half.
    fn public_key_pem(&self) -> &str;
    /// Sign `message`.
    fn sign_message(&self, message: &[u8]) -> Vec<u8>;
}

/// RSA PKCS#1 v1.5 / SHA-256 signer.
pub struct RsaSigner {
    key: rsa::pkcs1v15::SigningKey<Sha256>,
    /// SPKI PEM of the public key.
    pub pem: String,
}

impl RsaSigner {
    /// Generate a fresh 1024-bit key (fast, test use only).
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] if generation or encoding fails.
    pub fn generate() -> TrustResult<Self> {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024)
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        let pem = private
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key: rsa::pkcs1v15::SigningKey::<Sha256>::new(private),
            pem,
        })
    }

    /// Sign `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_vec()
    }
}

impl ArtifactSigner for RsaSigner {
    fn public_key_pem(&self) -> &str {
        &self.pem
    }

    fn sign_message(&self, message: &[u8]) -> Vec<u8> {
        self.sign(message)
    }
}

/// ECDSA P-256 / SHA-256 signer producing DER signatures.
pub struct EcdsaSigner {
    key: p256::ecdsa::SigningKey,
    /// SPKI PEM of the public key.
    pub pem: String,
}

impl EcdsaSigner {
    /// Generate a fresh key.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] if encoding fails.
    pub fn generate() -> TrustResult<Self> {
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let pem = key
            .verifying_key()
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        Ok(Self { key, pem })
    }

    /// Sign `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: p256::ecdsa::Signature = self.key.sign(message);
        sig.to_der().as_bytes().to_vec()
    }
}

impl ArtifactSigner for EcdsaSigner {
    fn public_key_pem(&self) -> &str {
        &self.pem
    }

    fn sign_message(&self, message: &[u8]) -> Vec<u8> {
        self.sign(message)
    }
}

/// Write `<artifact>.sig` signed by `signer`. Returns the signature path.
///
/// # Errors
///
/// Returns [`TrustError::Io`] if the artifact cannot be read or the
/// signature cannot be written.
pub fn sign_artifact(artifact: &Path, signer: &dyn ArtifactSigner) -> TrustResult<PathBuf> {
    let digest = digest_file(artifact)?;
    let sig_path = signature_path(artifact);
    let encoded = encode_signature(&signer.sign_message(digest.as_bytes()));
    std::fs::write(&sig_path, encoded).map_err(|source| TrustError::Io {
        path: sig_path.clone(),
        source,
    })?;
    Ok(sig_path)
}
