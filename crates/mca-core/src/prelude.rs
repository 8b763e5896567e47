//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_core::prelude::*;` to import all essential types.

pub use crate::{Container, StateStore};

pub use crate::{AnalysisResults, AnalysisText, Finding};

pub use crate::{PatternCache, ResultCache};

pub use crate::{CoreError, CoreResult};
