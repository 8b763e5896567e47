//! MCA Core - shared services for the extension host.
//!
//! This crate provides:
//! - [`Container`]: keyed service registry with lazily materialized factories
//! - [`StateStore`]: key/value state with synchronous change notification
//! - [`PatternCache`] and [`ResultCache`]: injectable caches
//! - The analysis context ([`AnalysisText`], [`AnalysisResults`]) that
//!   extensions read from and append to

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod cache;
mod container;
mod context;
mod error;
mod patterns;
mod state;

pub use cache::{CacheStats, ResultCache};
pub use container::Container;
pub use context::{
    ANALYSIS_RESULTS_KEY, ANALYSIS_TEXT_KEY, AnalysisResults, AnalysisText, Finding, analysis_results,
    analysis_text, install_analysis,
};
pub use error::{CoreError, CoreResult};
pub use patterns::{PATTERN_CACHE_KEY, PatternCache};
pub use state::{StateCallback, StateStore, StateSubscriptionId};
