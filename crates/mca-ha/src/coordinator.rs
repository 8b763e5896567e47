//! Leader coordinator.
//!
//! A background task owns the leadership state. It tries to acquire the
//! lease while following and renews it while leading; a failed, refused or
//! timed-out renewal demotes the instance immediately. Transitions are
//! mirrored in a [`watch`] channel and published on the [`EventBus`].
//! The task is the only writer of the leadership flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mca_events::{Event, EventBus, EventType};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::gate::PatchGate;
use crate::lease::LeaseLock;

/// Default lease key.
pub const DEFAULT_LEADER_KEY: &str = "mca:leader";

/// Default lease time-to-live.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);

/// Default renewal interval.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(3);

/// Leader election settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderConfig {
    /// Lease key shared by every competing instance.
    pub key: String,
    /// This instance's identity.
    pub holder: String,
    /// Lease time-to-live.
    pub ttl: Duration,
    /// How often to acquire or renew.
    pub renew_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_LEADER_KEY.to_string(),
            holder: format!("mca-{}", uuid::Uuid::new_v4()),
            ttl: DEFAULT_LEASE_TTL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
        }
    }
}

impl LeaderConfig {
    /// Default settings with an explicit holder identity.
    #[must_use]
    pub fn for_holder(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            ..Self::default()
        }
    }

    /// Set the lease key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set TTL and renewal interval.
    #[must_use]
    pub fn with_timing(mut self, ttl: Duration, renew_interval: Duration) -> Self {
        self.ttl = ttl;
        self.renew_interval = renew_interval;
        self
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::InvalidConfig`] if the key or holder is
    /// empty, or if the renewal interval is zero or not shorter than the TTL.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.key.is_empty() {
            return Err(CoordinationError::InvalidConfig("key must not be empty".into()));
        }
        if self.holder.is_empty() {
            return Err(CoordinationError::InvalidConfig("holder must not be empty".into()));
        }
        if self.renew_interval.is_zero() {
            return Err(CoordinationError::InvalidConfig(
                "renew interval must be greater than zero".into(),
            ));
        }
        if self.renew_interval >= self.ttl {
            return Err(CoordinationError::InvalidConfig(format!(
                "renew interval {:?} must be shorter than ttl {:?}",
                self.renew_interval, self.ttl
            )));
        }
        Ok(())
    }
}

struct Shared {
    config: LeaderConfig,
    lock: Arc<dyn LeaseLock>,
    bus: EventBus,
    is_leader: AtomicBool,
    leader_tx: watch::Sender<bool>,
    token: CancellationToken,
}

impl Shared {
    fn transition(&self, leader: bool, reason: &str) {
        self.is_leader.store(leader, Ordering::Release);
        self.leader_tx.send_replace(leader);

        let event_type = if leader {
            info!(key = %self.config.key, holder = %self.config.holder, "Acquired leadership");
            EventType::LeadershipAcquired
        } else {
            warn!(key = %self.config.key, holder = %self.config.holder, reason, "Lost leadership");
            EventType::LeadershipLost
        };
        self.bus.publish(
            Event::new(event_type)
                .with("key", self.config.key.as_str())
                .with("holder", self.config.holder.as_str())
                .with("reason", reason),
        );
    }

    /// One acquire-or-renew step, bounded by the renewal interval.
    async fn tick(&self) {
        let leader = self.is_leader.load(Ordering::Acquire);
        let cfg = &self.config;
        let attempt = async {
            if leader {
                self.lock.renew(&cfg.key, &cfg.holder, cfg.ttl).await
            } else {
                self.lock.try_acquire(&cfg.key, &cfg.holder, cfg.ttl).await
            }
        };
        let outcome = match tokio::time::timeout(cfg.renew_interval, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CoordinationError::Backend("lease operation timed out".into())),
        };

        match (leader, outcome) {
            (false, Ok(true)) => self.transition(true, "acquired"),
            (false, Ok(false)) => debug!(key = %cfg.key, "Lease held elsewhere"),
            (false, Err(e)) => warn!(key = %cfg.key, error = %e, "Lease acquisition failed"),
            (true, Ok(true)) => debug!(key = %cfg.key, "Lease renewed"),
            (true, Ok(false)) => self.transition(false, "lease lost"),
            (true, Err(e)) => {
                warn!(key = %cfg.key, error = %e, "Lease renewal failed");
                self.transition(false, "renewal failed");
            },
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.tick().await;
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                () = tokio::time::sleep(self.config.renew_interval) => {},
            }
        }

        if self.is_leader.load(Ordering::Acquire) {
            let cfg = &self.config;
            if let Err(e) = self.lock.release(&cfg.key, &cfg.holder).await {
                warn!(key = %cfg.key, error = %e, "Failed to release lease on stop");
            }
            self.transition(false, "stopped");
        }
        debug!(key = %self.config.key, "Leader coordinator stopped");
    }
}

/// Elects one leader among instances sharing a [`LeaseLock`].
pub struct LeaderCoordinator {
    shared: Arc<Shared>,
    leader_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderCoordinator {
    /// Create a stopped coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        config: LeaderConfig,
        lock: Arc<dyn LeaseLock>,
        bus: EventBus,
    ) -> CoordinationResult<Self> {
        config.validate()?;
        let (leader_tx, leader_rx) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                lock,
                bus,
                is_leader: AtomicBool::new(false),
                leader_tx,
                token: CancellationToken::new(),
            }),
            leader_rx,
            task: Mutex::new(None),
        })
    }

    /// Spawn the election task on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError::AlreadyStarted`] on a second call and
    /// [`CoordinationError::NoRuntime`] outside a runtime.
    pub fn start(&self) -> CoordinationResult<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.shared.token.is_cancelled() {
            return Err(CoordinationError::AlreadyStarted);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| CoordinationError::NoRuntime)?;
        info!(
            key = %self.shared.config.key,
            holder = %self.shared.config.holder,
            ttl_ms = self.shared.config.ttl.as_millis(),
            "Starting leader coordinator"
        );
        *task = Some(runtime.spawn(Arc::clone(&self.shared).run()));
        Ok(())
    }

    /// Stop the election task, releasing the lease if held.
    ///
    /// Waits for the task to finish. A stopped coordinator cannot be restarted.
    pub async fn stop(&self) {
        self.shared.token.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Leader coordinator task failed");
            if self.shared.is_leader.load(Ordering::Acquire) {
                self.shared.transition(false, "stopped");
            }
        }
    }

    /// Whether this instance currently holds leadership.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.shared.is_leader.load(Ordering::Acquire)
    }

    /// Watch leadership transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_rx.clone()
    }

    /// Wait until leadership equals `leader`, or `timeout` passes.
    /// Returns whether the state was reached.
    pub async fn wait_for(&self, leader: bool, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|v| *v == leader))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Gate for leader-only operations.
    #[must_use]
    pub fn gate(&self) -> PatchGate {
        PatchGate::new(self.subscribe(), self.shared.config.holder.clone())
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &LeaderConfig {
        &self.shared.config
    }
}

impl Drop for LeaderCoordinator {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

impl fmt::Debug for LeaderCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderCoordinator")
            .field("key", &self.shared.config.key)
            .field("holder", &self.shared.config.holder)
            .field("is_leader", &self.is_leader())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::lease::MemoryLeaseLock;

    const TTL: Duration = Duration::from_millis(300);
    const RENEW: Duration = Duration::from_millis(50);
    const WAIT: Duration = Duration::from_secs(3);

    fn config(holder: &str) -> LeaderConfig {
        LeaderConfig::for_holder(holder).with_timing(TTL, RENEW)
    }

    fn record(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe_all(move |e| {
            if matches!(
                e.event_type,
                EventType::LeadershipAcquired | EventType::LeadershipLost
            ) {
                sink.lock().unwrap().push(e.clone());
            }
        });
        events
    }

    /// Grants acquisition, then fails every renewal.
    struct FailingRenewals {
        inner: MemoryLeaseLock,
        renewals: AtomicUsize,
    }

    #[async_trait]
    impl LeaseLock for FailingRenewals {
        async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> CoordinationResult<bool> {
            self.inner.try_acquire(key, holder, ttl).await
        }

        async fn renew(&self, _key: &str, _holder: &str, _ttl: Duration) -> CoordinationResult<bool> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            Err(CoordinationError::Backend("backend unreachable".into()))
        }

        async fn release(&self, key: &str, holder: &str) -> CoordinationResult<bool> {
            self.inner.release(key, holder).await
        }

        async fn current_holder(&self, key: &str) -> CoordinationResult<Option<String>> {
            self.inner.current_holder(key).await
        }
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let cfg = LeaderConfig::default();
        assert_eq!(cfg.key, DEFAULT_LEADER_KEY);
        assert_eq!(cfg.ttl, Duration::from_secs(10));
        assert_eq!(cfg.renew_interval, Duration::from_secs(3));
        assert!(cfg.holder.starts_with("mca-"));
        assert!(cfg.validate().is_ok());

        let slow = config("a").with_timing(TTL, TTL);
        assert!(matches!(slow.validate(), Err(CoordinationError::InvalidConfig(_))));
        let zero = config("a").with_timing(TTL, Duration::ZERO);
        assert!(zero.validate().is_err());
        assert!(config("").validate().is_err());
        assert!(config("a").with_key("").validate().is_err());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let coord =
            LeaderCoordinator::new(config("a"), Arc::new(MemoryLeaseLock::new()), EventBus::new())
                .unwrap();
        assert!(matches!(coord.start(), Err(CoordinationError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_instance_leads_and_releases_on_stop() {
        let lock = MemoryLeaseLock::new();
        let bus = EventBus::new();
        let events = record(&bus);
        let coord = LeaderCoordinator::new(config("node-a"), Arc::new(lock.clone()), bus).unwrap();
        let gate = coord.gate();

        assert!(gate.authorize("before").unwrap_err().is_not_leader());
        coord.start().unwrap();
        assert!(matches!(coord.start(), Err(CoordinationError::AlreadyStarted)));

        assert!(coord.wait_for(true, WAIT).await);
        assert!(coord.is_leader());
        assert_eq!(gate.authorize("p-1").unwrap().holder, "node-a");
        assert_eq!(lock.current_holder(DEFAULT_LEADER_KEY).await.unwrap().as_deref(), Some("node-a"));

        coord.stop().await;
        assert!(!coord.is_leader());
        assert!(gate.authorize("after").is_err());
        assert_eq!(lock.current_holder(DEFAULT_LEADER_KEY).await.unwrap(), None);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::LeadershipAcquired);
        assert_eq!(events[1].event_type, EventType::LeadershipLost);
        assert_eq!(events[1].get_str("reason"), Some("stopped"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stolen_lease_demotes() {
        let lock = MemoryLeaseLock::new();
        let bus = EventBus::new();
        let events = record(&bus);
        let coord = LeaderCoordinator::new(config("node-a"), Arc::new(lock.clone()), bus).unwrap();
        coord.start().unwrap();
        assert!(coord.wait_for(true, WAIT).await);

        lock.force_holder(DEFAULT_LEADER_KEY, "intruder", Duration::from_secs(60));
        assert!(coord.wait_for(false, WAIT).await);
        assert!(coord.gate().authorize("p").is_err());

        coord.stop().await;
        assert_eq!(lock.current_holder(DEFAULT_LEADER_KEY).await.unwrap().as_deref(), Some("intruder"));
        let last = events.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.get_str("reason"), Some("lease lost"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_renewal_error_demotes() {
        let lock = Arc::new(FailingRenewals {
            inner: MemoryLeaseLock::new(),
            renewals: AtomicUsize::new(0),
        });
        let bus = EventBus::new();
        let events = record(&bus);
        let coord = LeaderCoordinator::new(config("node-a"), Arc::clone(&lock) as Arc<dyn LeaseLock>, bus)
            .unwrap();
        let mut rx = coord.subscribe();
        coord.start().unwrap();

        // Leadership is observed first, then revoked after the failed renewal.
        tokio::time::timeout(WAIT, rx.wait_for(|v| *v)).await.unwrap().unwrap();
        tokio::time::timeout(WAIT, rx.wait_for(|v| !*v)).await.unwrap().unwrap();
        assert!(lock.renewals.load(Ordering::SeqCst) >= 1);

        coord.stop().await;
        let reasons: Vec<String> = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == EventType::LeadershipLost)
            .filter_map(|e| e.get_str("reason").map(str::to_string))
            .collect();
        assert_eq!(reasons.first().map(String::as_str), Some("renewal failed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_instances_one_leader_then_failover() {
        let lock: Arc<dyn LeaseLock> = Arc::new(MemoryLeaseLock::new());
        let a = LeaderCoordinator::new(config("node-a"), Arc::clone(&lock), EventBus::new()).unwrap();
        let b = LeaderCoordinator::new(config("node-b"), Arc::clone(&lock), EventBus::new()).unwrap();
        a.start().unwrap();
        b.start().unwrap();

        for _ in 0..60 {
            if a.is_leader() || b.is_leader() {
                break;
            }
            tokio::time::sleep(RENEW).await;
        }
        assert!(a.is_leader() || b.is_leader(), "no leader elected");
        for _ in 0..10 {
            assert!(!(a.is_leader() && b.is_leader()));
            tokio::time::sleep(RENEW).await;
        }

        let (leader, follower) = if a.is_leader() { (&a, &b) } else { (&b, &a) };
        leader.stop().await;
        assert!(follower.wait_for(true, WAIT).await);
        follower.stop().await;
    }
}
