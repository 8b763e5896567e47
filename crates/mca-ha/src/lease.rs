//! Leases: time-bounded, renewable exclusive claims on a key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoordinationResult;

/// Stored state of one lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Identity of the holder.
    pub holder: String,
    /// Expiry as Unix milliseconds.
    pub expires_at_ms: i64,
}

impl LeaseRecord {
    pub(crate) fn new(holder: &str, ttl: Duration, now_ms: i64) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            holder: holder.to_string(),
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    /// Whether the lease has run out at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Whether `holder` holds an unexpired lease at `now_ms`.
    #[must_use]
    pub fn is_held_by(&self, holder: &str, now_ms: i64) -> bool {
        self.holder == holder && !self.is_expired(now_ms)
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Record to store if `holder` may acquire, given the current record.
///
/// Free, expired and self-held leases are granted.
pub(crate) fn grant_acquire(
    current: Option<&LeaseRecord>,
    holder: &str,
    ttl: Duration,
    now_ms: i64,
) -> Option<LeaseRecord> {
    match current {
        Some(record) if !record.is_expired(now_ms) && record.holder != holder => None,
        _ => Some(LeaseRecord::new(holder, ttl, now_ms)),
    }
}

/// Record to store if `holder` may renew. Only an unexpired self-held lease renews.
pub(crate) fn grant_renew(
    current: Option<&LeaseRecord>,
    holder: &str,
    ttl: Duration,
    now_ms: i64,
) -> Option<LeaseRecord> {
    match current {
        Some(record) if record.is_held_by(holder, now_ms) => {
            Some(LeaseRecord::new(holder, ttl, now_ms))
        },
        _ => None,
    }
}

/// A lease backend shared by every instance competing for a key.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Claim `key` for `holder` for `ttl`. Returns whether the claim was granted.
    ///
    /// A free or expired lease is granted; a lease already held by `holder`
    /// is extended.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool>;

    /// Extend a lease `holder` currently holds. Returns `false` if the lease
    /// expired or belongs to someone else.
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool>;

    /// Give up the lease if `holder` owns it. Returns whether it was released.
    async fn release(&self, key: &str, holder: &str) -> CoordinationResult<bool>;

    /// Current unexpired holder of `key`.
    async fn current_holder(&self, key: &str) -> CoordinationResult<Option<String>>;
}

/// In-process lease table. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseLock {
    leases: Arc<Mutex<HashMap<String, LeaseRecord>>>,
}

impl MemoryLeaseLock {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the lease on `key` regardless of the current holder.
    pub fn force_holder(&self, key: &str, holder: &str, ttl: Duration) {
        self.table()
            .insert(key.to_string(), LeaseRecord::new(holder, ttl, now_ms()));
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, LeaseRecord>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut table = self.table();
        match grant_acquire(table.get(key), holder, ttl, now_ms()) {
            Some(record) => {
                table.insert(key.to_string(), record);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool> {
        let mut table = self.table();
        match grant_renew(table.get(key), holder, ttl, now_ms()) {
            Some(record) => {
                table.insert(key.to_string(), record);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> CoordinationResult<bool> {
        let mut table = self.table();
        if table.get(key).is_some_and(|r| r.holder == holder) {
            table.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn current_holder(&self, key: &str) -> CoordinationResult<Option<String>> {
        let now = now_ms();
        Ok(self
            .table()
            .get(key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.holder.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(150);

    #[test]
    fn test_grant_rules() {
        let held = LeaseRecord::new("a", TTL, 1_000);
        assert_eq!(held.expires_at_ms, 1_150);

        assert!(grant_acquire(None, "a", TTL, 0).is_some());
        assert!(grant_acquire(Some(&held), "b", TTL, 1_100).is_none());
        assert!(grant_acquire(Some(&held), "a", TTL, 1_100).is_some());
        assert!(grant_acquire(Some(&held), "b", TTL, 1_150).is_some());

        assert!(grant_renew(None, "a", TTL, 0).is_none());
        assert!(grant_renew(Some(&held), "a", TTL, 1_100).is_some());
        assert!(grant_renew(Some(&held), "b", TTL, 1_100).is_none());
        assert!(grant_renew(Some(&held), "a", TTL, 1_200).is_none());
    }

    #[tokio::test]
    async fn test_memory_lock_exclusive() {
        let lock = MemoryLeaseLock::new();
        assert!(lock.try_acquire("k", "a", TTL).await.unwrap());
        assert!(!lock.try_acquire("k", "b", TTL).await.unwrap());
        assert!(lock.try_acquire("k", "a", TTL).await.unwrap());
        assert!(!lock.renew("k", "b", TTL).await.unwrap());
        assert!(lock.renew("k", "a", TTL).await.unwrap());
        assert_eq!(lock.current_holder("k").await.unwrap().as_deref(), Some("a"));

        assert!(!lock.release("k", "b").await.unwrap());
        assert!(lock.release("k", "a").await.unwrap());
        assert_eq!(lock.current_holder("k").await.unwrap(), None);
        assert!(lock.try_acquire("k", "b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_lock_expiry_allows_takeover() {
        let lock = MemoryLeaseLock::new();
        assert!(lock.try_acquire("k", "a", TTL).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!lock.renew("k", "a", TTL).await.unwrap());
        assert!(lock.try_acquire("k", "b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_holder_overrides() {
        let lock = MemoryLeaseLock::new();
        let shared = lock.clone();
        assert!(lock.try_acquire("k", "a", TTL).await.unwrap());
        shared.force_holder("k", "b", TTL);
        assert!(!lock.renew("k", "a", TTL).await.unwrap());
        assert_eq!(lock.current_holder("k").await.unwrap().as_deref(), Some("b"));
    }
}
