//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_telemetry::prelude::*;` to import all essential types.

pub use crate::{LogConfig, LogFormat, LogTarget, setup_logging};

pub use crate::{Counter, Latency, Metrics, metrics::names};

pub use crate::{TelemetryError, TelemetryResult};
