//! MCA Events - in-process event bus.
//!
//! This crate provides:
//! - [`Event`] / [`EventType`]: a typed event with a string-keyed payload
//! - [`EventBus`]: ordered synchronous handlers plus broadcast receivers
//! - [`call_isolated`] / [`dispatch_all`]: the isolate-and-continue policy
//!   shared by every callback registry in the workspace
//!
//! # Example
//!
//! ```rust
//! use mca_events::{Event, EventBus, EventType};
//!
//! let bus = EventBus::new();
//! bus.subscribe(EventType::ExtensionLoaded, |event| {
//!     println!("loaded {:?}", event.get_str("name"));
//! });
//!
//! let report = bus.publish(Event::new(EventType::ExtensionLoaded).with("name", "good"));
//! assert_eq!(report.delivered, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod dispatch;
mod event;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver, Handler, SubscriptionId};
pub use dispatch::{DispatchReport, call_isolated, dispatch_all, panic_message};
pub use event::{Event, EventType, GUEST_EVENT_PREFIX};
