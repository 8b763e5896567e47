//! Integration tests for running extension work on the task executor.
//!
//! Covers analysis inside worker tasks, retrying directory loads, shared
//! state updates from completion callbacks, and task lifecycle events.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mca_core::{ResultCache, StateStore};
use mca_crypto::{TrustConfig, TrustPolicy};
use mca_events::{Event, EventBus, EventType};
use mca_extensions::testing::{RecordingRuntime, WasmModuleBuilder};
use mca_extensions::{AnalysisSummary, ExtensionRegistry};
use mca_tasks::{RetryPolicy, TaskError, TaskExecutor, TaskOutcome, TaskState};
use serde_json::json;

fn registry(runtime: &RecordingRuntime, bus: &EventBus) -> Arc<ExtensionRegistry> {
    Arc::new(
        ExtensionRegistry::builder(
            TrustPolicy::new(&TrustConfig::advisory(vec![])).unwrap(),
            Arc::new(runtime.clone()),
        )
        .event_bus(bus.clone())
        .build(),
    )
}

fn write_module(dir: &Path, name: &str, priority: i32) {
    let manifest = format!(r#"{{"name":"{name}","priority":{priority}}}"#);
    std::fs::write(
        dir.join(format!("{name}.wasm")),
        WasmModuleBuilder::new().manifest(&manifest).build(),
    )
    .unwrap();
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn analysis_runs_on_a_worker_and_updates_shared_state() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "tokens", 1);
    write_module(dir.path(), "sentiment", 2);

    let bus = EventBus::new();
    let finished = Arc::new(Mutex::new(Vec::<Event>::new()));
    let sink = Arc::clone(&finished);
    bus.subscribe(EventType::TaskFinished, move |e| sink.lock().unwrap().push(e.clone()));

    let runtime = RecordingRuntime::new()
        .with_output("tokens", r#"{"findings":[{"tokens":3}]}"#)
        .with_output("sentiment", r#"{"findings":[{"score":0.5}]}"#);
    let reg = registry(&runtime, &bus);
    reg.load_all(dir.path()).unwrap();

    let state = StateStore::new();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    state.subscribe(move |key, _, value| seen.lock().unwrap().push((key.to_string(), value.clone())));

    let executor = TaskExecutor::builder(2).event_bus(bus.clone()).build().unwrap();
    let worker_reg = Arc::clone(&reg);
    let store = state.clone();
    let handle = executor.submit_named(
        "analysis",
        move |_| Ok(worker_reg.run_analysis("one two three")),
        move |outcome: TaskOutcome<AnalysisSummary>| {
            if let Some(summary) = outcome.into_value() {
                store
                    .update("analysis.findings", summary.findings.len())
                    .unwrap();
            }
        },
    );

    assert_eq!(handle.wait().await, TaskState::Completed);
    assert_eq!(state.get("analysis.findings", json!(0)), json!(2));
    assert_eq!(
        *observed.lock().unwrap(),
        vec![("analysis.findings".to_string(), json!(2))]
    );

    // The second extension saw the first one's finding in its input.
    let calls = runtime.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "tokens");
    assert!(calls[1].1.contains("\"tokens\":3"));

    let finished = finished.lock().unwrap();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].get_str("name"), Some("analysis"));
    assert_eq!(finished[0].get_str("state"), Some("completed"));

    assert!(executor.shutdown_and_drain(Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn directory_load_is_retried_until_it_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("extensions");

    let runtime = RecordingRuntime::new();
    let reg = registry(&runtime, &EventBus::new());
    let executor = TaskExecutor::new(1).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let worker_reg = Arc::clone(&reg);
    let (tx, rx) = tokio::sync::oneshot::channel();
    executor.submit(
        move |ctx| {
            fast_retry().run(ctx, |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                let result = worker_reg
                    .load_all(&dir)
                    .map_err(|e| TaskError::failed(e.to_string()));
                if attempt == 1 {
                    std::fs::create_dir(&dir).unwrap();
                    write_module(&dir, "late", 1);
                }
                result
            })
        },
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );

    let handles = rx.await.unwrap().into_value().unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(reg.contains("late"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn more_tasks_than_workers_share_a_result_cache() {
    let executor = TaskExecutor::new(2).unwrap();
    let cache: Arc<ResultCache<String, usize>> =
        Arc::new(ResultCache::new(16, Duration::from_secs(60)));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let words = ["alpha", "beta", "alpha", "gamma", "beta", "alpha", "delta", "gamma"];
    let handles: Vec<_> = words
        .iter()
        .map(|word| {
            let cache = Arc::clone(&cache);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let word = (*word).to_string();
            executor.submit(
                move |ctx| {
                    let now = running.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                    peak.fetch_max(now, Ordering::SeqCst);
                    ctx.sleep(Duration::from_millis(10))?;
                    let len = cache.get_or_insert_with(word.clone(), || word.len());
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(len)
                },
                |_| {},
            )
        })
        .collect();

    for handle in &handles {
        assert_eq!(handle.wait().await, TaskState::Completed);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(cache.get(&"gamma".to_string()), Some(5));
    assert_eq!(cache.stats().entries, 4);

    assert!(executor.shutdown_and_drain(Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_queued_analysis() {
    let runtime = RecordingRuntime::new();
    let reg = registry(&runtime, &EventBus::new());
    let executor = TaskExecutor::new(1).unwrap();

    let release = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&release);
    let first = executor.submit(
        move |ctx| {
            while !flag.load(Ordering::SeqCst) {
                ctx.sleep(Duration::from_millis(5))?;
            }
            Ok(())
        },
        |_| {},
    );
    for _ in 0..200 {
        if first.state() == TaskState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(first.state(), TaskState::Running);

    let worker_reg = Arc::clone(&reg);
    let queued = executor.submit(move |_| Ok(worker_reg.run_analysis("never")), |_| {});
    executor.shutdown();

    assert_eq!(queued.wait().await, TaskState::Cancelled);
    release.store(true, Ordering::SeqCst);
    let first_state = first.wait().await;
    assert!(matches!(first_state, TaskState::Completed | TaskState::Cancelled));
    assert!(runtime.calls().is_empty());
}
