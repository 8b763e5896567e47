//! Execution runtimes for verified extension modules.
//!
//! The registry never runs code itself: once a module has passed trust and
//! capability checks its bytes are handed to an [`ExtensionRuntime`], which
//! produces a callable [`ExtensionInstance`]. [`WasmRuntime`] is the
//! production runtime, backed by Extism with WASI disabled and no host
//! functions beyond the Extism kernel.

use std::time::Duration;

use extism::{Manifest, PluginBuilder, Wasm};
use tracing::debug;

use crate::error::{CallError, LoadError, LoadResult};
use crate::manifest::ExtensionManifest;

/// Exported function the host calls.
pub const DEFAULT_ENTRY_POINT: &str = "mca_analyze";

/// Default per-call execution limit.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default linear-memory limit in 64 KiB pages (16 MiB).
pub const DEFAULT_MEMORY_MAX_PAGES: u32 = 256;

/// Turns verified module bytes into callable instances.
pub trait ExtensionRuntime: Send + Sync {
    /// Instantiate `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the module cannot be instantiated.
    fn instantiate(
        &self,
        manifest: &ExtensionManifest,
        bytes: &[u8],
    ) -> LoadResult<Box<dyn ExtensionInstance>>;
}

/// A live extension.
pub trait ExtensionInstance: Send {
    /// Whether `entry` is a callable export.
    fn has_entry_point(&mut self, entry: &str) -> bool;

    /// Call `entry` with a JSON input document and return its JSON output.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the guest traps, times out or reports an error.
    fn call(&mut self, entry: &str, input: &str) -> Result<String, CallError>;
}

/// Extism-backed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmRuntime {
    call_timeout: Duration,
    memory_max_pages: u32,
}

impl Default for WasmRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WasmRuntime {
    /// Runtime with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            memory_max_pages: DEFAULT_MEMORY_MAX_PAGES,
        }
    }

    /// Set the per-call execution limit.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the linear-memory limit in 64 KiB pages.
    #[must_use]
    pub fn with_memory_max_pages(mut self, pages: u32) -> Self {
        self.memory_max_pages = pages;
        self
    }

    /// Per-call execution limit.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Memory limit in pages.
    #[must_use]
    pub fn memory_max_pages(&self) -> u32 {
        self.memory_max_pages
    }
}

impl ExtensionRuntime for WasmRuntime {
    fn instantiate(
        &self,
        manifest: &ExtensionManifest,
        bytes: &[u8],
    ) -> LoadResult<Box<dyn ExtensionInstance>> {
        let extism_manifest = Manifest::new([Wasm::data(bytes.to_vec())])
            .with_timeout(self.call_timeout)
            .with_memory_max(self.memory_max_pages);

        let plugin = PluginBuilder::new(extism_manifest)
            .with_wasi(false)
            .build()
            .map_err(|e| LoadError::Instantiate(format!("failed to build Extism plugin: {e}")))?;

        debug!(
            extension = %manifest.name,
            memory_max_pages = self.memory_max_pages,
            "Instantiated WASM extension"
        );
        Ok(Box::new(WasmInstance { plugin }))
    }
}

struct WasmInstance {
    plugin: extism::Plugin,
}

impl ExtensionInstance for WasmInstance {
    fn has_entry_point(&mut self, entry: &str) -> bool {
        self.plugin.function_exists(entry)
    }

    fn call(&mut self, entry: &str, input: &str) -> Result<String, CallError> {
        self.plugin
            .call::<&str, String>(entry, input)
            .map_err(|e| CallError(e.to_string()))
    }
}
