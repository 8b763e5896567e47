//! Detached signature files.
//!
//! The signature for `name.wasm` lives next to it as `name.wasm.sig` and
//! holds the base64-encoded signature bytes (surrounding whitespace is
//! ignored).

use std::path::{Path, PathBuf};

use base64::Engine as _;

use crate::error::{TrustError, TrustResult};

/// Suffix appended to an artifact path to locate its signature.
pub const SIGNATURE_SUFFIX: &str = ".sig";

/// Path of the detached signature belonging to `artifact`.
#[must_use]
pub fn signature_path(artifact: &Path) -> PathBuf {
    let mut os = artifact.as_os_str().to_owned();
    os.push(SIGNATURE_SUFFIX);
    PathBuf::from(os)
}

/// Read and decode the detached signature of `artifact`.
///
/// Returns `Ok(None)` when no signature file exists.
///
/// # Errors
///
/// Returns [`TrustError::InvalidEncoding`] if the file is not strict
/// base64, or [`TrustError::Io`] if it exists but cannot be read.
pub fn read_signature(artifact: &Path) -> TrustResult<Option<Vec<u8>>> {
    let path = signature_path(artifact);
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(TrustError::Io { path, source }),
    };

    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Err(TrustError::InvalidEncoding {
            path,
            reason: "signature file is empty".to_string(),
        });
    }

    base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map(Some)
        .map_err(|e| TrustError::InvalidEncoding {
            path,
            reason: e.to_string(),
        })
}

/// Encode raw signature bytes in the on-disk format.
#[must_use]
pub fn encode_signature(signature: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_path_appends_suffix() {
        assert_eq!(
            signature_path(Path::new("/ext/good.wasm")),
            PathBuf::from("/ext/good.wasm.sig")
        );
    }

    #[test]
    fn test_missing_signature_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_signature(&dir.path().join("a.wasm")).unwrap().is_none());
    }

    #[test]
    fn test_signature_decodes_with_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.wasm");
        std::fs::write(signature_path(&artifact), format!("  {}\n", encode_signature(b"sig"))).unwrap();
        assert_eq!(read_signature(&artifact).unwrap().unwrap(), b"sig");
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.wasm");
        std::fs::write(signature_path(&artifact), "not*base64!").unwrap();
        let err = read_signature(&artifact).unwrap_err();
        assert!(matches!(err, TrustError::InvalidEncoding { .. }));
    }

    #[test]
    fn test_empty_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.wasm");
        std::fs::write(signature_path(&artifact), "\n").unwrap();
        assert!(matches!(
            read_signature(&artifact).unwrap_err(),
            TrustError::InvalidEncoding { .. }
        ));
    }
}
