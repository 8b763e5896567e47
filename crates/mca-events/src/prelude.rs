//! Prelude module - commonly used types for convenient import.
//!
//! Use `use mca_events::prelude::*;` to import all essential types.

// Event bus
pub use crate::{EventBus, EventReceiver, SubscriptionId};

// Events
pub use crate::{Event, EventType};

// Dispatch policy
pub use crate::{DispatchReport, call_isolated, dispatch_all};
