//! Shared state store with change notification.
//!
//! Updates are serialized by a notify lock that covers both the mutation and
//! the notification of its subscribers: once [`StateStore::update`] returns,
//! every callback that was registered before the call has seen
//! `(key, old, new)` exactly once. The new value is published only after the
//! last callback returns, so no reader on any thread observes it earlier.
//!
//! Callbacks run without the value or subscriber locks held. A callback may
//! read, subscribe, unsubscribe or snapshot; until the update finishes it
//! observes the previous value. Updating the same store from one of its own
//! callbacks fails with [`CoreError::ReentrantUpdate`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mca_events::{DispatchReport, dispatch_all};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{CoreError, CoreResult};

/// Change callback: `(key, old value, new value)`.
pub type StateCallback = Arc<dyn Fn(&str, Option<&Value>, &Value) + Send + Sync>;

/// Handle for removing a state subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateSubscriptionId(u64);

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Stores currently notifying on this thread.
    static NOTIFYING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

struct NotifyGuard(u64);

impl NotifyGuard {
    fn enter(store: u64) -> Self {
        NOTIFYING.with(|n| n.borrow_mut().push(store));
        Self(store)
    }

    fn active(store: u64) -> bool {
        NOTIFYING.with(|n| n.borrow().contains(&store))
    }
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        NOTIFYING.with(|n| {
            let mut n = n.borrow_mut();
            if let Some(pos) = n.iter().rposition(|id| *id == self.0) {
                n.remove(pos);
            }
        });
    }
}

struct Inner {
    id: u64,
    /// Serializes update-and-notify.
    notify: Mutex<()>,
    values: Mutex<HashMap<String, Value>>,
    callbacks: Mutex<Vec<(StateSubscriptionId, StateCallback)>>,
    next_subscription: AtomicU64,
}

/// Thread-safe keyed store; the single source of truth observed by host
/// code and extensions.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
                notify: Mutex::new(()),
                values: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Set `key` to `value` and notify every subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReentrantUpdate`] when called from a callback
    /// of this store.
    pub fn update(&self, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<DispatchReport> {
        let key = key.into();
        if NotifyGuard::active(self.inner.id) {
            return Err(CoreError::ReentrantUpdate(key));
        }
        let value = value.into();

        let _serial = lock(&self.inner.notify);
        let old = lock(&self.inner.values).get(&key).cloned();
        let callbacks: Vec<StateCallback> = lock(&self.inner.callbacks)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        let report = {
            let _guard = NotifyGuard::enter(self.inner.id);
            dispatch_all("state_callback", callbacks.iter(), |callback: &StateCallback| {
                callback(&key, old.as_ref(), &value);
            })
        };
        trace!(key = %key, notified = report.invoked(), "State updated");
        if report.failed > 0 {
            warn!(key = %key, failed = report.failed, "State callbacks panicked");
        }
        lock(&self.inner.values).insert(key, value);
        Ok(report)
    }

    /// Current value of `key`, or `default` if unset.
    #[must_use]
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.try_get(key).unwrap_or(default)
    }

    /// Current value of `key`, if set.
    #[must_use]
    pub fn try_get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.values).get(key).cloned()
    }

    /// Register a change callback. It is not invoked for an update that is
    /// already notifying.
    pub fn subscribe<F>(&self, callback: F) -> StateSubscriptionId
    where
        F: Fn(&str, Option<&Value>, &Value) + Send + Sync + 'static,
    {
        let id = StateSubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.callbacks).push((id, Arc::new(callback)));
        id
    }

    /// Remove a change callback. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: StateSubscriptionId) -> bool {
        let mut callbacks = lock(&self.inner.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    /// Snapshot of all entries.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        lock(&self.inner.values).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = lock(&self.inner.values).len();
        let callbacks = lock(&self.inner.callbacks).len();
        f.debug_struct("StateStore")
            .field("entries", &entries)
            .field("callbacks", &callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Seen = Arc<Mutex<Vec<(String, Option<Value>, Value)>>>;

    fn recording(store: &StateStore) -> Seen {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        store.subscribe(move |k, old, new| {
            s.lock().unwrap().push((k.to_string(), old.cloned(), new.clone()));
        });
        seen
    }

    #[test]
    fn test_update_notifies_with_old_and_new() {
        let store = StateStore::new();
        let seen = recording(&store);

        store.update("status", "parsing").unwrap();
        store.update("status", "done").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("status".into(), None, json!("parsing")));
        assert_eq!(seen[1], ("status".into(), Some(json!("parsing")), json!("done")));
    }

    #[test]
    fn test_get_with_default() {
        let store = StateStore::new();
        assert_eq!(store.get("missing", json!(0)), json!(0));
        store.update("n", 3).unwrap();
        assert_eq!(store.get("n", json!(0)), json!(3));
    }

    #[test]
    fn test_callback_invoked_exactly_once_before_update_returns() {
        let store = StateStore::new();
        let seen = recording(&store);
        store.update("k", 1).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.get("k", Value::Null), json!(1));
    }

    #[test]
    fn test_panicking_callback_isolated() {
        let store = StateStore::new();
        store.subscribe(|_, _, _| panic!("bad callback"));
        let seen = recording(&store);

        let report = store.update("k", true).unwrap();
        assert_eq!(report, DispatchReport { delivered: 1, failed: 1 });
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(store.get("k", Value::Null), json!(true));
    }

    #[test]
    fn test_reentrant_update_rejected() {
        let store = StateStore::new();
        let inner = store.clone();
        let result = Arc::new(Mutex::new(None));
        let r = Arc::clone(&result);
        store.subscribe(move |_, _, _| {
            *r.lock().unwrap() = Some(inner.update("other", 1).is_err());
        });

        store.update("k", 1).unwrap();
        assert_eq!(*result.lock().unwrap(), Some(true));
        assert!(store.try_get("other").is_none());
    }

    /// Run `update("k", 1)` on a helper thread and fail if it hangs.
    fn update_completes(store: &StateStore) -> DispatchReport {
        let (tx, rx) = std::sync::mpsc::channel();
        let store = store.clone();
        std::thread::spawn(move || {
            let _ = tx.send(store.update("k", 1));
        });
        rx.recv_timeout(std::time::Duration::from_secs(5))
            .expect("update() did not return")
            .unwrap()
    }

    #[test]
    fn test_snapshot_from_callback_does_not_block() {
        let store = StateStore::new();
        let inner = store.clone();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        store.subscribe(move |_, _, _| {
            *s.lock().unwrap() = Some(inner.snapshot());
        });

        store.update("k", 0).unwrap();
        let report = update_completes(&store);
        assert_eq!(report.delivered, 1);
        // The callback sees the value from before the update it is notified of.
        assert_eq!(seen.lock().unwrap().as_ref().unwrap()["k"], json!(0));
        assert_eq!(store.get("k", Value::Null), json!(1));
    }

    #[test]
    fn test_subscribe_from_callback_does_not_block() {
        let store = StateStore::new();
        let inner = store.clone();
        let late = Arc::new(Mutex::new(0_usize));
        let l = Arc::clone(&late);
        store.subscribe(move |_, _, _| {
            let l = Arc::clone(&l);
            inner.subscribe(move |_, _, _| {
                let mut n = l.lock().unwrap();
                *n = n.saturating_add(1);
            });
        });

        let report = update_completes(&store);
        // Subscribed mid-notification: not called for that update.
        assert_eq!(report.invoked(), 1);
        assert_eq!(*late.lock().unwrap(), 0);

        store.update("k", 2).unwrap();
        assert_eq!(*late.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_from_callback_does_not_block() {
        let store = StateStore::new();
        let inner = store.clone();
        let own_id = Arc::new(Mutex::new(None::<StateSubscriptionId>));
        let slot = Arc::clone(&own_id);
        let calls = Arc::new(Mutex::new(0_usize));
        let c = Arc::clone(&calls);
        let id = store.subscribe(move |_, _, _| {
            let mut n = c.lock().unwrap();
            *n = n.saturating_add(1);
            if let Some(id) = *slot.lock().unwrap() {
                assert!(inner.unsubscribe(id));
            }
        });
        *own_id.lock().unwrap() = Some(id);

        update_completes(&store);
        store.update("k", 2).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_reads_and_debug_from_callback_do_not_block() {
        let store = StateStore::new();
        let inner = store.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        store.subscribe(move |_, _, new| {
            let rendered = format!("{inner:?}");
            s.lock().unwrap().push((inner.try_get("k"), new.clone(), rendered));
        });

        update_completes(&store);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, None);
        assert_eq!(seen[0].1, json!(1));
        assert!(seen[0].2.contains("callbacks: 1"));
    }

    #[test]
    fn test_unsubscribe() {
        let store = StateStore::new();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let id = store.subscribe(move |k, _, v| {
            s.lock().unwrap().push((k.to_string(), None, v.clone()));
        });
        assert!(store.unsubscribe(id));
        store.update("k", 1).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_updates_notify_every_write() {
        let store = StateStore::new();
        let seen = recording(&store);
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.update(format!("t{t}"), i).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 100);
        assert_eq!(store.get("t0", Value::Null), json!(24));
    }
}
