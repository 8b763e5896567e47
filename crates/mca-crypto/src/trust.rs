//! Trust policy: deciding whether an extension artifact may be loaded.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::digest::{Sha256Digest, digest_file, read_and_digest};
use crate::error::{TrustError, TrustResult};
use crate::keys::KeyFingerprint;
use crate::signature::{read_signature, signature_path};
use crate::verifier::SignatureVerifier;

/// Trust settings supplied at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Whether a valid signature is mandatory.
    #[serde(default)]
    pub required: bool,
    /// PEM-encoded trusted public keys (key material, not paths).
    #[serde(default)]
    pub public_keys: Vec<String>,
    /// In advisory mode, still verify a signature that is present.
    #[serde(default = "default_true")]
    pub verify_if_present: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            required: false,
            public_keys: Vec::new(),
            verify_if_present: true,
        }
    }
}

impl TrustConfig {
    /// Configuration that requires a valid signature from one of `public_keys`.
    #[must_use]
    pub fn required(public_keys: Vec<String>) -> Self {
        Self {
            required: true,
            public_keys,
            verify_if_present: true,
        }
    }

    /// Advisory configuration: unsigned artifacts load as [`TrustStatus::Unverified`].
    #[must_use]
    pub fn advisory(public_keys: Vec<String>) -> Self {
        Self {
            required: false,
            public_keys,
            verify_if_present: true,
        }
    }

    /// Ignore signatures entirely when not required.
    #[must_use]
    pub fn without_verify_if_present(mut self) -> Self {
        self.verify_if_present = false;
        self
    }
}

/// Trust status of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    /// Loaded without a verified signature (advisory mode only).
    Unverified,
    /// A trusted key validated the signature.
    Verified,
    /// Trust could not be established; the extension must not load.
    Rejected,
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unverified => write!(f, "unverified"),
            Self::Verified => write!(f, "verified"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Successful trust decision for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustVerdict {
    /// `Verified` or `Unverified`.
    pub status: TrustStatus,
    /// Digest of the artifact content.
    pub digest: Sha256Digest,
    /// Decoded signature, when one was present.
    pub signature: Option<Vec<u8>>,
    /// Key that validated the signature.
    pub signed_by: Option<KeyFingerprint>,
}

/// Artifact bytes paired with the trust verdict computed over exactly those bytes.
#[derive(Clone)]
pub struct VerifiedArtifact {
    path: PathBuf,
    bytes: Vec<u8>,
    verdict: TrustVerdict,
}

impl VerifiedArtifact {
    /// Where the artifact was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Artifact content as verified.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Trust verdict for these bytes.
    #[must_use]
    pub fn verdict(&self) -> &TrustVerdict {
        &self.verdict
    }

    /// Digest of [`Self::bytes`].
    #[must_use]
    pub fn digest(&self) -> &Sha256Digest {
        &self.verdict.digest
    }
}

impl fmt::Debug for VerifiedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedArtifact")
            .field("path", &self.path)
            .field("len", &self.bytes.len())
            .field("verdict", &self.verdict)
            .finish()
    }
}

/// Immutable, process-wide trust policy built from a [`TrustConfig`].
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    required: bool,
    verify_if_present: bool,
    verifier: SignatureVerifier,
}

impl TrustPolicy {
    /// Build the policy, parsing every trusted key.
    ///
    /// # Errors
    ///
    /// Returns [`TrustError::InvalidKey`] if a configured key is malformed.
    pub fn new(config: &TrustConfig) -> TrustResult<Self> {
        let verifier = SignatureVerifier::from_pems(&config.public_keys)?;
        if config.required && verifier.is_empty() {
            warn!("Signatures are required but no trusted keys are configured; every extension will be rejected");
        }
        Ok(Self {
            required: config.required,
            verify_if_present: config.verify_if_present,
            verifier,
        })
    }

    /// Whether a valid signature is mandatory.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// The trusted key set.
    #[must_use]
    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    /// Verify the artifact at `path`, streaming its content.
    ///
    /// # Errors
    ///
    /// Returns a [`TrustError`] when the artifact must be rejected.
    pub fn verify(&self, path: &Path) -> TrustResult<TrustVerdict> {
        self.decide(path, || digest_file(path))
    }

    /// Read `path` once and verify exactly the bytes that were read.
    ///
    /// # Errors
    ///
    /// Returns a [`TrustError`] when the artifact must be rejected.
    pub fn verify_artifact(&self, path: &Path) -> TrustResult<VerifiedArtifact> {
        let mut bytes = None;
        let verdict = self.decide(path, || {
            let (content, digest) = read_and_digest(path)?;
            bytes = Some(content);
            Ok(digest)
        })?;
        Ok(VerifiedArtifact {
            path: path.to_path_buf(),
            bytes: bytes.unwrap_or_default(),
            verdict,
        })
    }

    fn decide<F>(&self, path: &Path, digest: F) -> TrustResult<TrustVerdict>
    where
        F: FnOnce() -> TrustResult<Sha256Digest>,
    {
        let digest = digest()?;
        let signature = read_signature(path);

        let must_verify = match &signature {
            Ok(None) if self.required => {
                return Err(TrustError::MissingSignature {
                    path: signature_path(path),
                });
            },
            Ok(None) => false,
            Ok(Some(_)) | Err(_) => self.required || self.verify_if_present,
        };

        if !must_verify {
            debug!(path = %path.display(), "Extension accepted without signature verification");
            return Ok(TrustVerdict {
                status: TrustStatus::Unverified,
                digest,
                signature: signature.ok().flatten(),
                signed_by: None,
            });
        }

        let Some(signature) = signature? else {
            return Err(TrustError::MissingSignature {
                path: signature_path(path),
            });
        };
        let signed_by = self.verifier.verify_digest(&digest, &signature)?;

        Ok(TrustVerdict {
            status: TrustStatus::Verified,
            digest,
            signature: Some(signature),
            signed_by: Some(signed_by),
        })
    }
}

/// Verify one artifact against `config`.
///
/// # Errors
///
/// Returns a [`TrustError`] if a key is malformed or the artifact is rejected.
pub fn verify(path: &Path, config: &TrustConfig) -> TrustResult<TrustVerdict> {
    TrustPolicy::new(config)?.verify(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EcdsaSigner, RsaSigner};
    use crate::signature::encode_signature;

    fn write_artifact(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn sign_file(path: &Path, sign: impl Fn(&[u8]) -> Vec<u8>) {
        let digest = Sha256Digest::of(&std::fs::read(path).unwrap());
        std::fs::write(signature_path(path), encode_signature(&sign(digest.as_bytes()))).unwrap();
    }

    #[test]
    fn test_required_missing_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rsa = RsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "bad.wasm", b"bad");

        let err = verify(&path, &TrustConfig::required(vec![rsa.pem.clone()])).unwrap_err();
        assert!(matches!(err, TrustError::MissingSignature { .. }));
        assert_eq!(err.reason(), "missing signature");
    }

    #[test]
    fn test_required_rsa_and_ecdsa_signatures_verify() {
        let dir = tempfile::tempdir().unwrap();
        let rsa = RsaSigner::generate().unwrap();
        let ec = EcdsaSigner::generate().unwrap();
        let config = TrustConfig::required(vec![rsa.pem.clone(), ec.pem.clone()]);

        let a = write_artifact(dir.path(), "a.wasm", b"alpha");
        sign_file(&a, |m| rsa.sign(m));
        let b = write_artifact(dir.path(), "b.wasm", b"beta");
        sign_file(&b, |m| ec.sign(m));

        for path in [a, b] {
            let verdict = verify(&path, &config).unwrap();
            assert_eq!(verdict.status, TrustStatus::Verified);
            assert!(verdict.signed_by.is_some());
        }
    }

    #[test]
    fn test_untrusted_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let trusted = EcdsaSigner::generate().unwrap();
        let stranger = RsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");
        sign_file(&path, |m| stranger.sign(m));

        let err = verify(&path, &TrustConfig::required(vec![trusted.pem.clone()])).unwrap_err();
        assert!(matches!(err, TrustError::UntrustedSignature));
    }

    #[test]
    fn test_tampered_content_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ec = EcdsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"original");
        sign_file(&path, |m| ec.sign(m));
        std::fs::write(&path, b"tampered").unwrap();

        assert!(verify(&path, &TrustConfig::required(vec![ec.pem.clone()])).is_err());
    }

    #[test]
    fn test_required_without_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ec = EcdsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");
        sign_file(&path, |m| ec.sign(m));

        let err = verify(&path, &TrustConfig::required(Vec::new())).unwrap_err();
        assert!(matches!(err, TrustError::NoTrustedKeys));
    }

    #[test]
    fn test_advisory_unsigned_is_unverified() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");

        let verdict = verify(&path, &TrustConfig::advisory(Vec::new())).unwrap();
        assert_eq!(verdict.status, TrustStatus::Unverified);
        assert_eq!(verdict.digest, Sha256Digest::of(b"x"));
    }

    #[test]
    fn test_advisory_present_but_invalid_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ec = EcdsaSigner::generate().unwrap();
        let stranger = EcdsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");
        sign_file(&path, |m| stranger.sign(m));

        assert!(verify(&path, &TrustConfig::advisory(vec![ec.pem.clone()])).is_err());
    }

    #[test]
    fn test_advisory_bad_encoding_rejected_when_verifying_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");
        std::fs::write(signature_path(&path), "%%%").unwrap();

        let err = verify(&path, &TrustConfig::advisory(Vec::new())).unwrap_err();
        assert!(matches!(err, TrustError::InvalidEncoding { .. }));
    }

    #[test]
    fn test_advisory_without_verify_if_present_ignores_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"x");
        std::fs::write(signature_path(&path), "%%%").unwrap();

        let config = TrustConfig::advisory(Vec::new()).without_verify_if_present();
        assert_eq!(verify(&path, &config).unwrap().status, TrustStatus::Unverified);
    }

    #[test]
    fn test_verify_artifact_keeps_verified_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let ec = EcdsaSigner::generate().unwrap();
        let path = write_artifact(dir.path(), "x.wasm", b"payload");
        sign_file(&path, |m| ec.sign(m));

        let policy = TrustPolicy::new(&TrustConfig::required(vec![ec.pem.clone()])).unwrap();
        let artifact = policy.verify_artifact(&path).unwrap();
        assert_eq!(artifact.bytes(), b"payload");
        assert_eq!(artifact.digest(), &Sha256Digest::of(b"payload"));
        assert_eq!(artifact.verdict().status, TrustStatus::Verified);
    }

    #[test]
    fn test_trust_config_serde_defaults() {
        let config: TrustConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.required);
        assert!(config.verify_if_present);
        assert!(config.public_keys.is_empty());
    }
}
