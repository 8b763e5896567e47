//! MCA HA - lease-based leader coordination.
//!
//! This crate provides:
//! - [`LeaseLock`]: renewable exclusive claims, with [`MemoryLeaseLock`]
//!   and the file-backed [`FileLeaseLock`]
//! - [`LeaderCoordinator`]: background election with transitions published
//!   on the event bus and mirrored in a watch channel
//! - [`PatchGate`]: refuses leader-only operations on followers
//!
//! Leadership is only as exclusive as the lease: an instance that cannot
//! renew within the TTL demotes itself, but clock skew between hosts
//! narrows that guarantee.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod coordinator;
mod error;
mod file_lease;
mod gate;
mod lease;

pub use coordinator::{
    DEFAULT_LEADER_KEY, DEFAULT_LEASE_TTL, DEFAULT_RENEW_INTERVAL, LeaderConfig, LeaderCoordinator,
};
pub use error::{CoordinationError, CoordinationResult};
pub use file_lease::{FileLeaseLock, LEASE_SUFFIX};
pub use gate::{PatchAuthorization, PatchGate};
pub use lease::{LeaseLock, LeaseRecord, MemoryLeaseLock};
