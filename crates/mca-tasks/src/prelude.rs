//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_tasks::prelude::*;` to import all essential types.

pub use crate::{TaskExecutor, TaskHandle, TaskOutcome, TaskState};

pub use crate::{CancellableTask, TaskContext};

pub use crate::{RetryPolicy, TaskError};
