//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_ha::prelude::*;` to import all essential types.

pub use crate::{LeaderConfig, LeaderCoordinator, PatchGate};

pub use crate::{FileLeaseLock, LeaseLock, MemoryLeaseLock};

pub use crate::{CoordinationError, CoordinationResult};
