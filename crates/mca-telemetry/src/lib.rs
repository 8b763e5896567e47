//! MCA Telemetry - logging setup and in-process metrics.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup (pretty, compact, JSON; stderr,
//!   stdout or rolling files)
//! - A small metrics registry of named counters and latency recorders
//!
//! # Example
//!
//! ```rust,no_run
//! use mca_telemetry::{LogConfig, LogFormat, Metrics, metrics::names, setup_logging};
//!
//! # fn main() -> Result<(), mca_telemetry::TelemetryError> {
//! setup_logging(&LogConfig::new("debug").with_format(LogFormat::Json))?;
//!
//! let metrics = Metrics::new();
//! metrics.counter(names::EXTENSIONS_LOADED).inc();
//! tracing::info!("Telemetry ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod metrics;
pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
pub use metrics::{Counter, Latency, LatencyTimer, Metrics, MetricsSnapshot};
