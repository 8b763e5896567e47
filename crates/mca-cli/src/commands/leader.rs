//! Leader commands - join the election and report the outcome.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use mca_events::EventBus;
use mca_ha::{FileLeaseLock, LeaderCoordinator, LeaseLock, MemoryLeaseLock};
use serde_json::json;

use super::{HostContext, print_json};
use crate::config_bridge;
use crate::theme::Theme;

/// Patch id used to exercise the leader-only gate.
const PROBE_PATCH: &str = "leader-probe";

fn lease_lock(host: &HostContext) -> anyhow::Result<Arc<dyn LeaseLock>> {
    match host.config().leader.lock_dir.as_deref() {
        Some(dir) => {
            let dir = host.base().join(Path::new(dir));
            let lock = FileLeaseLock::new(dir.clone())
                .with_context(|| format!("failed to open lease directory {}", dir.display()))?;
            Ok(Arc::new(lock))
        },
        None => Ok(Arc::new(MemoryLeaseLock::new())),
    }
}

pub(crate) async fn probe(host: &HostContext, holder: Option<&str>) -> anyhow::Result<()> {
    let cfg = host.config();
    if !cfg.leader.enabled && !host.is_json() {
        println!(
            "{}",
            Theme::warning("leader.enabled is false; probing anyway")
        );
    }

    let leader_config = config_bridge::to_leader_config(cfg, holder);
    let ttl = leader_config.ttl;
    let coordinator = LeaderCoordinator::new(leader_config, lease_lock(host)?, EventBus::new())?;
    coordinator.start()?;

    let elected = coordinator.wait_for(true, ttl).await;
    let authorization = coordinator.gate().authorize(PROBE_PATCH);
    coordinator.stop().await;

    let holder = &coordinator.config().holder;
    let key = &coordinator.config().key;
    if host.is_json() {
        return print_json(&json!({
            "key": key,
            "holder": holder,
            "elected": elected,
            "authorized_at": authorization.as_ref().ok().map(|a| a.authorized_at),
        }));
    }

    if elected {
        println!("{}", Theme::success(&format!("{holder} became leader for {key}")));
    } else {
        println!(
            "{}",
            Theme::warning(&format!("{holder} did not win {key} within {}ms", ttl.as_millis()))
        );
    }
    match authorization {
        Ok(auth) => println!(
            "  {}",
            Theme::dimmed(&format!("patch {} authorized at {}", auth.patch_id, auth.authorized_at))
        ),
        Err(e) => println!("  {}", Theme::dimmed(&e.to_string())),
    }
    println!("{}", Theme::info("Stepped down"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::OutputFormat;
    use mca_config::{Config, ResolvedConfig};

    fn host(dir: &Path, lock_dir: Option<&str>) -> HostContext {
        let mut config = Config::default();
        config.leader.ttl_ms = 600;
        config.leader.renew_interval_ms = 100;
        config.leader.lock_dir = lock_dir.map(str::to_string);
        let resolved = ResolvedConfig {
            config,
            loaded_files: Vec::new(),
            env_overrides: 0,
        };
        HostContext::new(resolved, dir.to_path_buf(), OutputFormat::Json)
    }

    #[tokio::test]
    async fn test_probe_with_memory_lock() {
        let dir = tempfile::tempdir().unwrap();
        probe(&host(dir.path(), None), Some("node-a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_with_file_lock_creates_lease_dir() {
        let dir = tempfile::tempdir().unwrap();
        probe(&host(dir.path(), Some("leases")), Some("node-a"))
            .await
            .unwrap();
        assert!(dir.path().join("leases").is_dir());
    }
}
