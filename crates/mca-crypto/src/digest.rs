//! Streaming SHA-256 content digests.
//!
//! Artifacts are hashed in fixed-size blocks so a large module is never
//! required to be resident just to compute its digest.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{TrustError, TrustResult};

/// Block size used when streaming file content into the hasher (1 MiB).
pub const DIGEST_BLOCK_SIZE: usize = 1024 * 1024;

/// A SHA-256 digest (32 bytes).
#[derive(Clone, Copy, Hash, Serialize, Deserialize)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Hash an in-memory buffer.
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash everything a reader yields, one block at a time.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the reader fails.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut block = vec![0u8; DIGEST_BLOCK_SIZE];
        loop {
            let n = match reader.read(&mut block) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&block[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Create from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from a hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hex or not 32 bytes.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl PartialEq for Sha256Digest {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Sha256Digest {}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Stream a file into the hasher without retaining its content.
///
/// # Errors
///
/// Returns [`TrustError::Io`] if the file cannot be opened or read.
pub fn digest_file(path: &Path) -> TrustResult<Sha256Digest> {
    let file = File::open(path).map_err(|source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Sha256Digest::of_reader(file).map_err(|source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a file exactly once, hashing each block as it arrives.
///
/// The returned bytes are the same bytes the digest was computed over, so
/// callers can verify, inspect and execute one snapshot of the artifact.
///
/// # Errors
///
/// Returns [`TrustError::Io`] if the file cannot be opened or read.
pub fn read_and_digest(path: &Path) -> TrustResult<(Vec<u8>, Sha256Digest)> {
    let io_err = |source| TrustError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let capacity = file
        .metadata()
        .ok()
        .and_then(|m| usize::try_from(m.len()).ok())
        .unwrap_or(0);

    let mut bytes = Vec::with_capacity(capacity);
    let mut hasher = Sha256::new();
    let mut block = vec![0u8; DIGEST_BLOCK_SIZE];
    loop {
        let n = match file.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_err(e)),
        };
        hasher.update(&block[..n]);
        bytes.extend_from_slice(&block[..n]);
    }

    Ok((bytes, Sha256Digest(hasher.finalize().into())))
}
