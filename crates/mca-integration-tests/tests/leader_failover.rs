//! Integration tests for leader election over file-backed leases.
//!
//! Each coordinator opens its own `FileLeaseLock` on a shared directory, the
//! way separate host processes would.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mca_events::{Event, EventBus, EventType};
use mca_ha::{FileLeaseLock, LeaderConfig, LeaderCoordinator, LeaseLock, LeaseRecord};

const KEY: &str = "mca:leader";
const TTL: Duration = Duration::from_millis(400);
const RENEW: Duration = Duration::from_millis(80);
const WAIT: Duration = Duration::from_secs(5);

fn coordinator(dir: &std::path::Path, holder: &str, bus: &EventBus) -> LeaderCoordinator {
    let lock: Arc<dyn LeaseLock> = Arc::new(FileLeaseLock::new(dir).unwrap());
    let config = LeaderConfig::for_holder(holder)
        .with_key(KEY)
        .with_timing(TTL, RENEW);
    LeaderCoordinator::new(config, lock, bus.clone()).unwrap()
}

fn record(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe_all(move |e| sink.lock().unwrap().push(e.clone()));
    events
}

fn now_ms() -> i64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    i64::try_from(elapsed.as_millis()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_leader_at_a_time_and_the_follower_takes_over() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let events = record(&bus);

    let a = coordinator(dir.path(), "node-a", &bus);
    a.start().unwrap();
    assert!(a.wait_for(true, WAIT).await);

    let b = coordinator(dir.path(), "node-b", &bus);
    b.start().unwrap();
    for _ in 0..8 {
        assert!(a.is_leader());
        assert!(!b.is_leader());
        tokio::time::sleep(RENEW).await;
    }

    // Only the leader may authorize patches.
    assert!(a.gate().authorize("patch-1").is_ok());
    let refused = b.gate().authorize("patch-1").unwrap_err();
    assert!(refused.is_not_leader());

    a.stop().await;
    assert!(!a.is_leader());
    assert!(b.wait_for(true, WAIT).await);
    assert_eq!(b.gate().authorize("patch-2").unwrap().holder, "node-b");
    b.stop().await;

    let transitions: Vec<(String, String)> = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                EventType::LeadershipAcquired | EventType::LeadershipLost
            )
        })
        .map(|e| {
            (
                e.event_type.to_string(),
                e.get_str("holder").unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        transitions,
        [
            ("leadership_acquired".to_string(), "node-a".to_string()),
            ("leadership_lost".to_string(), "node-a".to_string()),
            ("leadership_acquired".to_string(), "node-b".to_string()),
            ("leadership_lost".to_string(), "node-b".to_string()),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lease_left_by_a_crashed_holder_is_taken_after_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let lock = FileLeaseLock::new(dir.path()).unwrap();

    let ghost = LeaseRecord {
        holder: "ghost".into(),
        expires_at_ms: now_ms() + 300,
    };
    std::fs::write(lock.lease_path(KEY), serde_json::to_vec(&ghost).unwrap()).unwrap();

    let c = coordinator(dir.path(), "node-c", &EventBus::new());
    c.start().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!c.is_leader());
    assert_eq!(lock.current_holder(KEY).await.unwrap().as_deref(), Some("ghost"));

    assert!(c.wait_for(true, WAIT).await);
    assert_eq!(lock.current_holder(KEY).await.unwrap().as_deref(), Some("node-c"));

    c.stop().await;
    assert_eq!(lock.current_holder(KEY).await.unwrap(), None);
}
