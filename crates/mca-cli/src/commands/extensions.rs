//! Extension commands - list, verify, scan, and analyze.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, bail};
use mca_core::{PATTERN_CACHE_KEY, PatternCache};
use mca_crypto::TrustPolicy;
use mca_events::EventBus;
use mca_extensions::{
    AnalysisSummary, CapabilityError, ExtensionManifest, ExtensionRegistry,
    ExtensionStatus, Rejection, inspect, scan as scan_module,
};
use mca_tasks::{TaskError, TaskExecutor, TaskOutcome};
use serde_json::json;
use tracing::info;

use super::{HostContext, print_json};
use crate::config_bridge;
use crate::theme::Theme;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn trust_policy(host: &HostContext) -> anyhow::Result<TrustPolicy> {
    let trust = config_bridge::to_trust_config(host.config());
    TrustPolicy::new(&trust).context("invalid trust configuration")
}

fn build_registry(host: &HostContext, bus: EventBus) -> anyhow::Result<ExtensionRegistry> {
    let cfg = host.config();
    let runtime = Arc::new(config_bridge::to_wasm_runtime(cfg));
    Ok(ExtensionRegistry::builder(trust_policy(host)?, runtime)
        .allow_list(config_bridge::to_allow_list(cfg))
        .entry_point(&cfg.extensions.entry_point)
        .event_bus(bus)
        .container(host.container().clone())
        .metrics(host.metrics().clone())
        .build())
}

/// Keep the statuses whose name matches `pattern`, compiled through the
/// host's shared pattern cache.
fn filter_by_name(
    host: &HostContext,
    status: Vec<ExtensionStatus>,
    pattern: Option<&str>,
) -> anyhow::Result<Vec<ExtensionStatus>> {
    let Some(pattern) = pattern else {
        return Ok(status);
    };
    let patterns = host.container().resolve::<PatternCache>(PATTERN_CACHE_KEY)?;
    let re = patterns.get(pattern).context("invalid --name pattern")?;
    Ok(status.into_iter().filter(|s| re.is_match(&s.name)).collect())
}

fn print_loaded(status: &[ExtensionStatus]) {
    if status.is_empty() {
        println!("{}", Theme::info("No extensions loaded"));
        return;
    }
    println!("{}", Theme::header("Loaded extensions"));
    println!(
        "  {:<20} {:<10} {:>8}  {:<10} {:<16}",
        "NAME", "VERSION", "PRIORITY", "TRUST", "SIGNED BY"
    );
    println!("{}", Theme::separator());
    for s in status {
        println!(
            "  {:<20} {:<10} {:>8}  {:<10} {:<16}",
            s.name,
            s.version.to_string(),
            s.priority,
            Theme::trust(s.trust),
            s.signed_by.as_deref().unwrap_or("-"),
        );
    }
}

fn print_rejected(rejected: &[Rejection]) {
    if rejected.is_empty() {
        return;
    }
    println!("\n{}", Theme::header("Rejected extensions"));
    println!("{}", Theme::separator());
    for r in rejected {
        println!("  {}", Theme::error(&r.to_string()));
        if !r.offending.is_empty() {
            println!(
                "    {}",
                Theme::dimmed(&format!("offending: {}", r.offending.join(", ")))
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) fn list(host: &HostContext, dir: Option<&Path>, name: Option<&str>) -> anyhow::Result<()> {
    let dir = config_bridge::extensions_dir(host.config(), host.base(), dir);
    let registry = build_registry(host, EventBus::new())?;
    registry
        .load_all(&dir)
        .with_context(|| format!("failed to load extensions from {}", dir.display()))?;

    let status = filter_by_name(host, registry.status(), name)?;
    let rejected = registry.rejected();
    if host.is_json() {
        return print_json(&json!({ "loaded": status, "rejected": rejected }));
    }

    print_loaded(&status);
    print_rejected(&rejected);
    println!(
        "\n{}",
        Theme::dimmed(&format!(
            "{} loaded, {} rejected in {}",
            status.len(),
            rejected.len(),
            dir.display()
        ))
    );
    Ok(())
}

pub(crate) fn verify(host: &HostContext, file: &Path) -> anyhow::Result<()> {
    let policy = trust_policy(host)?;
    match policy.verify(file) {
        Ok(verdict) => {
            let signed_by = verdict.signed_by.as_ref().map(ToString::to_string);
            if host.is_json() {
                return print_json(&json!({
                    "path": file,
                    "trust": verdict.status,
                    "digest": verdict.digest.to_hex(),
                    "signed_by": signed_by,
                }));
            }
            println!("{}", Theme::success(&format!("{} {}", file.display(), Theme::trust(verdict.status))));
            println!("  {:<10} {}", "digest", verdict.digest);
            println!("  {:<10} {}", "signed by", signed_by.as_deref().unwrap_or("-"));
            Ok(())
        },
        Err(e) => {
            if host.is_json() {
                print_json(&json!({
                    "path": file,
                    "trust": "rejected",
                    "reason": e.reason(),
                    "detail": e.to_string(),
                }))?;
            } else {
                println!("{}", Theme::error(&format!("{}: {}", file.display(), e.reason())));
                println!("  {}", Theme::dimmed(&e.to_string()));
            }
            bail!("trust check failed: {}", e.reason())
        },
    }
}

pub(crate) fn scan(host: &HostContext, file: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let allow_list = config_bridge::to_allow_list(host.config());

    match scan_module(&bytes, &allow_list) {
        Ok(info) => {
            let stem = file.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
            let manifest = match info.manifest_section() {
                Some(section) => ExtensionManifest::parse(section, &stem)?,
                None => ExtensionManifest::fallback(&stem),
            };
            let imports: Vec<String> = info
                .imports()
                .iter()
                .map(|i| format!("{}::{}", i.module, i.name))
                .collect();

            if host.is_json() {
                return print_json(&json!({
                    "path": file,
                    "manifest": manifest,
                    "imports": imports,
                    "exports": info.function_exports(),
                }));
            }
            println!("{}", Theme::success(&format!("{} passed the capability scan", file.display())));
            println!("  {:<12} {} {}", "manifest", manifest.name, manifest.version);
            println!("  {:<12} {}", "allow-list", allow_list);
            for import in &imports {
                println!("  {:<12} {import}", "import");
            }
            for export in info.function_exports() {
                println!("  {:<12} {export}", "export");
            }
            Ok(())
        },
        Err(CapabilityError::Disallowed { offending }) => {
            if host.is_json() {
                print_json(&json!({ "path": file, "offending": offending }))?;
            } else {
                println!("{}", Theme::error(&format!("{}: disallowed imports", file.display())));
                for name in &offending {
                    println!("  {}", Theme::warning(name));
                }
                let info = inspect(&bytes);
                println!(
                    "  {}",
                    Theme::dimmed(&format!("{} import(s) inspected", info.imports().len()))
                );
            }
            bail!("capability scan failed for {}", file.display())
        },
    }
}

/// Load extensions and run one analysis pass on the task executor.
///
/// Directory errors are retried with the configured policy.
pub(crate) async fn analyze(
    host: &HostContext,
    text: String,
    dir: Option<&Path>,
) -> anyhow::Result<()> {
    let cfg = host.config();
    let dir: PathBuf = config_bridge::extensions_dir(cfg, host.base(), dir);
    let retry = config_bridge::to_retry_policy(cfg);

    let bus = EventBus::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe_all(move |event| {
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.event_type.to_string());
    });

    let registry = Arc::new(build_registry(host, bus.clone())?);
    let executor = TaskExecutor::builder(cfg.executor.workers)
        .metrics(host.metrics().clone())
        .event_bus(bus)
        .build()?;

    let (tx, rx) = tokio::sync::oneshot::channel::<TaskOutcome<AnalysisSummary>>();
    let worker_registry = Arc::clone(&registry);
    executor.submit_named(
        "analysis",
        move |ctx| {
            retry.run(ctx, |attempt| {
                worker_registry
                    .load_all(&dir)
                    .map_err(|e| TaskError::failed(format!("attempt {attempt}: {e}")))
            })?;
            ctx.checkpoint()?;
            Ok(worker_registry.run_analysis(&text))
        },
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );

    let outcome = rx.await.context("analysis task dropped its result")?;
    let drained = executor
        .shutdown_and_drain(Duration::from_millis(cfg.executor.drain_timeout_ms))
        .await;
    if !drained {
        info!("Executor did not drain before the timeout");
    }

    let summary = match outcome {
        TaskOutcome::Completed(summary) => summary,
        TaskOutcome::Failed(e) => bail!("analysis failed: {e}"),
        TaskOutcome::Cancelled => bail!("analysis was cancelled"),
    };
    let events = std::mem::take(&mut *events.lock().unwrap_or_else(PoisonError::into_inner));

    if host.is_json() {
        let failed: Vec<_> = summary
            .failed
            .iter()
            .map(|(name, error)| json!({ "extension": name, "error": error }))
            .collect();
        return print_json(&json!({
            "extensions": registry.len(),
            "findings": summary.findings,
            "failed": failed,
            "events": events,
        }));
    }

    println!("{}", Theme::header("Analysis"));
    println!("{}", Theme::separator());
    for finding in &summary.findings {
        println!("  {:<20} {}", finding.extension, finding.detail);
    }
    for (name, error) in &summary.failed {
        println!("  {}", Theme::error(&format!("{name}: {error}")));
    }
    print_rejected(&registry.rejected());
    println!(
        "\n{}",
        Theme::dimmed(&format!(
            "{} extension(s), {} finding(s), {} event(s)",
            registry.len(),
            summary.findings.len(),
            events.len()
        ))
    );
    Ok(())
}
