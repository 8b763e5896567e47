//! Extension discovery.
//!
//! A [`Discovery`] names a directory; each call to [`Discovery::iter`]
//! performs a fresh, lazy scan, so the directory can be rescanned at any
//! time. Only regular `*.wasm` files directly inside the directory are
//! candidates, visited in file-name order.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::descriptor::ExtensionDescriptor;

/// File suffix of extension modules.
pub const EXTENSION_SUFFIX: &str = "wasm";

/// A restartable scan over one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    dir: PathBuf,
}

impl Discovery {
    /// Scan `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory being scanned.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a new scan.
    ///
    /// Unreadable entries are logged and skipped.
    #[must_use]
    pub fn iter(&self) -> DiscoveryIter {
        DiscoveryIter {
            inner: WalkDir::new(&self.dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

impl IntoIterator for &Discovery {
    type Item = ExtensionDescriptor;
    type IntoIter = DiscoveryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`Discovery::iter`].
pub struct DiscoveryIter {
    inner: walkdir::IntoIter,
}

impl std::fmt::Debug for DiscoveryIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryIter").finish_non_exhaustive()
    }
}

impl Iterator for DiscoveryIter {
    type Item = ExtensionDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                },
            };

            let path = entry.path();
            let is_candidate = entry.file_type().is_file()
                && path.extension().is_some_and(|ext| ext == EXTENSION_SUFFIX);
            if is_candidate {
                debug!(path = %path.display(), "Discovered extension candidate");
                return Some(ExtensionDescriptor::from_path(path));
            }
        }
    }
}

/// Discover candidates in `dir`.
#[must_use]
pub fn discover(dir: &Path) -> Discovery {
    Discovery::new(dir)
}
