//! MCA Extensions - verified, capability-scanned WASM extensions.
//!
//! This crate provides:
//! - [`Discovery`]: lazy, restartable enumeration of `*.wasm` candidates
//! - [`scan`]: static import analysis against a [`CapabilityAllowList`]
//! - [`ExtensionManifest`]: identity, priority and dependencies read from the
//!   `mca.manifest` custom section
//! - [`ExtensionRegistry`]: the verify, scan, load pipeline with last-wins
//!   registration and multi-round dependency resolution
//! - [`WasmRuntime`]: Extism-backed execution with no WASI and no host
//!   functions
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use mca_crypto::{TrustConfig, TrustPolicy};
//! use mca_extensions::{CapabilityAllowList, ExtensionRegistry, WasmRuntime};
//!
//! let policy = TrustPolicy::new(&TrustConfig::required(vec![])).unwrap();
//! let registry = ExtensionRegistry::builder(policy, Arc::new(WasmRuntime::new()))
//!     .allow_list(CapabilityAllowList::new(["extism"]))
//!     .build();
//!
//! for handle in registry.load_all(Path::new("extensions")).unwrap() {
//!     println!("{}: loaded={}", handle.name(), handle.is_loaded());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod descriptor;
mod discovery;
mod error;
mod extension;
mod manifest;
mod registry;
mod runtime;
mod scanner;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use descriptor::{ExtensionDescriptor, ExtensionHandle, RejectedCheck, Rejection};
pub use discovery::{Discovery, DiscoveryIter, EXTENSION_SUFFIX, discover};
pub use error::{
    CallError, CapabilityError, CapabilityResult, LoadError, LoadResult, RegistryError,
    RegistryResult,
};
pub use extension::{AnalysisReport, ExtensionStatus, LoadedExtension};
pub use manifest::{DEFAULT_PRIORITY, Dependency, ExtensionManifest, HOST_DEPENDENCY};
pub use registry::{
    AnalysisSummary, CONTAINER_KEY_PREFIX, ExtensionRegistry, ExtensionRegistryBuilder,
    SUMMARY_CACHE_KEY, SummaryCache, container_key,
};
pub use runtime::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_ENTRY_POINT, DEFAULT_MEMORY_MAX_PAGES, ExtensionInstance,
    ExtensionRuntime, WasmRuntime,
};
pub use scanner::{
    COMPONENT_MODEL, CapabilityAllowList, DYNAMIC_LINKING, ImportRef, MALFORMED,
    MANIFEST_SECTION, ModuleInfo, inspect, scan, top_level_name,
};
