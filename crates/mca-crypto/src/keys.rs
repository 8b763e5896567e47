//! Trusted public keys (RSA PKCS#1 v1.5 and ECDSA P-256), loaded from PEM.

use std::fmt;

use p256::ecdsa::signature::Verifier as _;
use p256::pkcs8::{DecodePublicKey as _, EncodePublicKey as _};
use rsa::pkcs1::DecodeRsaPublicKey as _;
use rsa::pkcs8::{DecodePublicKey as _, EncodePublicKey as _};
use rsa::signature::Verifier as _;
use sha2::{Digest, Sha256};

use crate::error::{TrustError, TrustResult};

/// Short, stable identifier of a trusted key (first 8 bytes of the
/// SHA-256 of its SPKI DER encoding, hex encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        Self(hex::encode(&digest[..8]))
    }

    /// Hex form of the fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Algorithm family of a trusted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with PKCS#1 v1.5 padding and SHA-256.
    RsaPkcs1v15,
    /// ECDSA over NIST P-256 with SHA-256.
    EcdsaP256,
}

#[derive(Clone)]
enum KeyMaterial {
    Rsa(rsa::pkcs1v15::VerifyingKey<Sha256>),
    Ecdsa(p256::ecdsa::VerifyingKey),
}

/// A public key trusted to sign extensions.
#[derive(Clone)]
pub struct TrustedKey {
    material: KeyMaterial,
    fingerprint: KeyFingerprint,
}

impl TrustedKey {
    /// Parse a PEM-encoded public key.
    ///
    /// Accepts SPKI (`PUBLIC KEY`) RSA and P-256 keys, and PKCS#1
    /// (`RSA PUBLIC KEY`) RSA keys.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] if the PEM is not a supported key.
    pub fn from_pem(pem: &str) -> TrustResult<Self> {
        let pem = pem.trim();

        if let Ok(key) = rsa::RsaPublicKey::from_public_key_pem(pem) {
            return Self::rsa(key);
        }
        if let Ok(key) = rsa::RsaPublicKey::from_pkcs1_pem(pem) {
            return Self::rsa(key);
        }
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
            let der = key
                .to_public_key_der()
                .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
            return Ok(Self {
                material: KeyMaterial::Ecdsa(key),
                fingerprint: KeyFingerprint::of_der(der.as_bytes()),
            });
        }

        Err(TrustError::InvalidKey(
            "expected an RSA or P-256 public key in PEM form".to_string(),
        ))
    }

    fn rsa(key: rsa::RsaPublicKey) -> TrustResult<Self> {
        let der = key
            .to_public_key_der()
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        Ok(Self {
            fingerprint: KeyFingerprint::of_der(der.as_bytes()),
            material: KeyMaterial::Rsa(rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key)),
        })
    }

    /// Algorithm family of this key.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.material {
            KeyMaterial::Rsa(_) => KeyAlgorithm::RsaPkcs1v15,
            KeyMaterial::Ecdsa(_) => KeyAlgorithm::EcdsaP256,
        }
    }

    /// Fingerprint of this key.
    #[must_use]
    pub fn fingerprint(&self) -> &KeyFingerprint {
        &self.fingerprint
    }

    /// Check `signature` over `message` with this key.
    ///
    /// ECDSA signatures are accepted in DER or fixed-size (r || s) form.
    #[must_use]
    pub fn verifies(&self, message: &[u8], signature: &[u8]) -> bool {
        match &self.material {
            KeyMaterial::Rsa(key) => rsa::pkcs1v15::Signature::try_from(signature)
                .is_ok_and(|sig| key.verify(message, &sig).is_ok()),
            KeyMaterial::Ecdsa(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature)
                    .or_else(|_| p256::ecdsa::Signature::from_slice(signature));
                sig.is_ok_and(|sig| key.verify(message, &sig).is_ok())
            },
        }
    }
}

impl fmt::Debug for TrustedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKey")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
