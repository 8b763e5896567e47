//! MCA Tasks - bounded executor and cooperative cancellation.
//!
//! This crate provides:
//! - [`TaskExecutor`]: a fixed-size worker pool with completion callbacks
//! - [`TaskHandle`]: state, cancellation, progress and waiting for one task
//! - [`TaskContext`] / [`CancellableTask`]: the cooperative side of
//!   cancellation, used inside work bodies
//! - [`RetryPolicy`]: exponential backoff that never retries cancellation
//!
//! # Example
//!
//! ```rust,no_run
//! use mca_tasks::{TaskExecutor, TaskOutcome};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = TaskExecutor::new(4)?;
//! let handle = executor.submit(
//!     |ctx| {
//!         ctx.checkpoint()?;
//!         Ok("analysis done")
//!     },
//!     |outcome| {
//!         if let TaskOutcome::Completed(msg) = outcome {
//!             println!("{msg}");
//!         }
//!     },
//! );
//! handle.wait().await;
//! executor.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod executor;
mod handle;
mod retry;
mod state;
mod task;

pub use error::{ExecutorError, ExecutorResult, TaskError};
pub use executor::{ExecutorBuilder, TaskExecutor};
pub use handle::{Progress, ProgressListener, TaskContext, TaskHandle, TaskId};
pub use retry::RetryPolicy;
pub use state::TaskState;
pub use task::{CancellableTask, TaskOutcome};
