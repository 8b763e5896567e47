//! Candidate descriptors and load outcomes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::extension::LoadedExtension;

/// A candidate extension file found by discovery.
///
/// Carries only what can be known without reading the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionDescriptor {
    path: PathBuf,
    stem: String,
}

impl ExtensionDescriptor {
    /// Describe the file at `path`.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, stem }
    }

    /// Location of the module.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without the `.wasm` suffix; the default extension name.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }
}

/// Which check rejected an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectedCheck {
    /// Digest or signature verification.
    Trust,
    /// Static capability scan.
    Capability,
    /// Manifest, entry point or instantiation.
    Load,
    /// Unsatisfied dependency.
    Dependency,
}

impl fmt::Display for RejectedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trust => write!(f, "trust"),
            Self::Capability => write!(f, "capability"),
            Self::Load => write!(f, "load"),
            Self::Dependency => write!(f, "dependency"),
        }
    }
}

/// Diagnostic record for an extension that will not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Module path.
    pub path: PathBuf,
    /// Manifest name when known, otherwise the file stem.
    pub name: String,
    /// Failed check.
    pub check: RejectedCheck,
    /// Short reason, e.g. `missing signature`.
    pub reason: String,
    /// Full error message.
    pub detail: String,
    /// Offending import names for capability rejections.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offending: Vec<String>,
}

impl Rejection {
    pub(crate) fn new(
        descriptor: &ExtensionDescriptor,
        name: &str,
        check: RejectedCheck,
        reason: impl Into<String>,
        detail: impl fmt::Display,
    ) -> Self {
        Self {
            path: descriptor.path().to_path_buf(),
            name: name.to_string(),
            check,
            reason: reason.into(),
            detail: detail.to_string(),
            offending: Vec::new(),
        }
    }

    pub(crate) fn with_offending(mut self, offending: Vec<String>) -> Self {
        self.offending = offending;
        self
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} check failed: {}",
            self.name,
            self.path.display(),
            self.check,
            self.reason
        )
    }
}

/// Outcome of loading one candidate.
#[derive(Debug, Clone)]
pub enum ExtensionHandle {
    /// Registered and callable.
    Loaded(Arc<LoadedExtension>),
    /// Refused; kept for diagnostics only.
    Rejected(Rejection),
}

impl ExtensionHandle {
    /// Whether the extension was registered.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// The loaded extension, if any.
    #[must_use]
    pub fn loaded(&self) -> Option<&Arc<LoadedExtension>> {
        match self {
            Self::Loaded(ext) => Some(ext),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Loaded(_) => None,
            Self::Rejected(r) => Some(r),
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Loaded(ext) => ext.name(),
            Self::Rejected(r) => &r.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_stem() {
        let d = ExtensionDescriptor::from_path("/ext/sentiment.wasm");
        assert_eq!(d.stem(), "sentiment");
        assert_eq!(d.path(), Path::new("/ext/sentiment.wasm"));
    }

    #[test]
    fn test_rejection_display_and_json() {
        let d = ExtensionDescriptor::from_path("bad.wasm");
        let r = Rejection::new(
            &d,
            "bad",
            RejectedCheck::Trust,
            "missing signature",
            "missing signature: bad.wasm.sig",
        );
        assert_eq!(
            r.to_string(),
            "bad (bad.wasm): trust check failed: missing signature"
        );

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["check"], "trust");
        assert!(json.get("offending").is_none());
    }
}
