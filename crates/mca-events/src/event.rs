//! Event types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every event type published on behalf of an extension guest.
///
/// Host event names never carry it, so a guest cannot publish under a
/// lifecycle name such as `loaded`.
pub const GUEST_EVENT_PREFIX: &str = "ext:";

/// Kinds of events published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An extension was verified, scanned, instantiated and registered.
    ExtensionLoaded,
    /// A registered extension was replaced by a later one with the same name.
    ExtensionEvicted,
    /// An extension was explicitly unloaded.
    ExtensionUnloaded,
    /// An extension failed a trust, capability, load or dependency check.
    ExtensionRejected,
    /// A task began running on a worker.
    TaskStarted,
    /// A task reported progress.
    TaskProgress,
    /// A task reached a terminal state.
    TaskFinished,
    /// This instance became the leader.
    LeadershipAcquired,
    /// This instance stopped being the leader.
    LeadershipLost,
    /// Application-defined event (e.g. published by an extension).
    Custom(String),
}

impl EventType {
    /// Stable string name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExtensionLoaded => "loaded",
            Self::ExtensionEvicted => "evicted",
            Self::ExtensionUnloaded => "unloaded",
            Self::ExtensionRejected => "rejected",
            Self::TaskStarted => "task_started",
            Self::TaskProgress => "task_progress",
            Self::TaskFinished => "task_finished",
            Self::LeadershipAcquired => "leadership_acquired",
            Self::LeadershipLost => "leadership_lost",
            Self::Custom(name) => name,
        }
    }

    /// Event type for `name` as published by an extension guest.
    #[must_use]
    pub fn guest(name: &str) -> Self {
        Self::Custom(format!("{GUEST_EVENT_PREFIX}{name}"))
    }

    /// Whether this type came from an extension guest.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Custom(name) if name.starts_with(GUEST_EVENT_PREFIX))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event: a type plus a string-keyed payload of opaque values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind, used for dispatch.
    pub event_type: EventType,
    /// Event payload.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty payload.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a string payload field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::new(EventType::ExtensionLoaded)
            .with("name", "good")
            .with("priority", 10);
        assert_eq!(event.get_str("name"), Some("good"));
        assert_eq!(event.get("priority"), Some(&Value::from(10)));
        assert_eq!(event.event_type.as_str(), "loaded");
    }

    #[test]
    fn test_custom_type_name() {
        assert_eq!(EventType::Custom("finding".into()).to_string(), "finding");
    }

    #[test]
    fn test_guest_type_never_matches_host_names() {
        let spoofed = EventType::guest("loaded");
        assert_eq!(spoofed.as_str(), "ext:loaded");
        assert_ne!(spoofed.to_string(), EventType::ExtensionLoaded.to_string());
        assert!(spoofed.is_guest());
        assert!(!EventType::Custom("loaded".into()).is_guest());
        assert!(!EventType::TaskStarted.is_guest());
    }

    #[test]
    fn test_event_serde() {
        let event = Event::new(EventType::TaskProgress).with("fraction", 0.5);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"task_progress\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
