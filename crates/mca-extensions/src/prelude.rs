//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_extensions::prelude::*;` to import all essential types.

pub use crate::{ExtensionHandle, ExtensionRegistry, LoadedExtension, Rejection};

pub use crate::{CapabilityAllowList, ExtensionManifest};

pub use crate::{ExtensionRuntime, WasmRuntime};

pub use crate::{LoadError, RegistryError, RegistryResult};
