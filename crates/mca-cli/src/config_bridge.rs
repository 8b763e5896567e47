//! Bridge from `mca_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates each section into the type its owning crate expects,
//! so conversion happens once, in one place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mca_config::Config;
use mca_core::{Container, PATTERN_CACHE_KEY, PatternCache};
use mca_crypto::TrustConfig;
use mca_extensions::{CapabilityAllowList, SUMMARY_CACHE_KEY, SummaryCache, WasmRuntime};
use mca_ha::LeaderConfig;
use mca_tasks::RetryPolicy;
use mca_telemetry::{LogConfig, LogFormat, Metrics};

/// Convert the `[logging]` section to a [`LogConfig`].
#[must_use]
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let format = match cfg.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        "json" => LogFormat::Json,
        "full" => LogFormat::Full,
        _ => LogFormat::Compact,
    };

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    log_config
}

/// Convert the `[trust]` section to a [`TrustConfig`].
///
/// Keys are carried as PEM text; validation already rejected anything else.
#[must_use]
pub(crate) fn to_trust_config(cfg: &Config) -> TrustConfig {
    TrustConfig {
        required: cfg.trust.required,
        public_keys: cfg.trust.public_keys.clone(),
        verify_if_present: cfg.trust.verify_if_present,
    }
}

/// Convert `[capabilities]` to the scanner allow-list.
#[must_use]
pub(crate) fn to_allow_list(cfg: &Config) -> CapabilityAllowList {
    CapabilityAllowList::new(&cfg.capabilities.allowed_imports)
}

/// Build the WASM runtime with the `[extensions]` limits.
#[must_use]
pub(crate) fn to_wasm_runtime(cfg: &Config) -> WasmRuntime {
    WasmRuntime::new()
        .with_call_timeout(Duration::from_millis(cfg.extensions.call_timeout_ms))
        .with_memory_max_pages(cfg.extensions.memory_max_pages)
}

/// Build the analysis summary cache from the `[cache]` limits.
#[must_use]
pub(crate) fn to_summary_cache(cfg: &Config, metrics: Metrics) -> SummaryCache {
    SummaryCache::new(cfg.cache.max_entries, Duration::from_secs(cfg.cache.ttl_secs))
        .with_metrics(metrics)
}

/// Service container holding the host's shared caches.
#[must_use]
pub(crate) fn host_container(cfg: &Config, metrics: &Metrics) -> Container {
    let container = Container::new();
    container.register_instance(
        SUMMARY_CACHE_KEY,
        Arc::new(to_summary_cache(cfg, metrics.clone())),
    );
    container.register_instance(PATTERN_CACHE_KEY, Arc::new(PatternCache::new()));
    container
}

/// Extension directory, with `override_dir` taking precedence.
#[must_use]
pub(crate) fn extensions_dir(cfg: &Config, base: &Path, override_dir: Option<&Path>) -> PathBuf {
    match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => resolve(base, &cfg.extensions.dir),
    }
}

/// Convert `[retry]` to a [`RetryPolicy`].
#[must_use]
pub(crate) fn to_retry_policy(cfg: &Config) -> RetryPolicy {
    RetryPolicy {
        max_attempts: cfg.retry.max_attempts,
        initial_delay: Duration::from_millis(cfg.retry.initial_delay_ms),
        max_delay: Duration::from_millis(cfg.retry.max_delay_ms),
        multiplier: cfg.retry.multiplier,
        jitter: cfg.retry.jitter,
    }
}

/// Convert `[leader]` to a [`LeaderConfig`]. `holder` overrides the
/// generated identity.
#[must_use]
pub(crate) fn to_leader_config(cfg: &Config, holder: Option<&str>) -> LeaderConfig {
    let base = match holder {
        Some(holder) => LeaderConfig::for_holder(holder),
        None => LeaderConfig::default(),
    };
    base.with_key(&cfg.leader.key).with_timing(
        Duration::from_millis(cfg.leader.ttl_ms),
        Duration::from_millis(cfg.leader.renew_interval_ms),
    )
}

fn resolve(base: &Path, entry: &str) -> PathBuf {
    let path = Path::new(entry);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_format_mapping() {
        let mut cfg = Config::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["mca_ha=trace".into()];

        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["mca_ha=trace".to_string()]);
    }

    #[test]
    fn test_unknown_format_falls_back_to_compact() {
        let mut cfg = Config::default();
        cfg.logging.level = "info".into();
        cfg.logging.format = "fancy".into();
        assert_eq!(to_log_config(&cfg).format, LogFormat::Compact);
    }

    #[test]
    fn test_trust_config_copies_settings() {
        let mut cfg = Config::default();
        cfg.trust.required = false;
        cfg.trust.verify_if_present = false;
        cfg.trust.public_keys = vec!["-----BEGIN PUBLIC KEY-----\ninline\n".into()];

        let trust = to_trust_config(&cfg);
        assert!(!trust.required);
        assert!(!trust.verify_if_present);
        assert_eq!(trust.public_keys, cfg.trust.public_keys);
    }

    #[test]
    fn test_extensions_dir_override_wins() {
        let mut cfg = Config::default();
        cfg.extensions.dir = "exts".into();
        let base = Path::new("/srv/mca");

        assert_eq!(extensions_dir(&cfg, base, None), PathBuf::from("/srv/mca/exts"));
        assert_eq!(
            extensions_dir(&cfg, base, Some(Path::new("/tmp/other"))),
            PathBuf::from("/tmp/other")
        );
    }

    #[test]
    fn test_retry_and_leader_timing() {
        let mut cfg = Config::default();
        cfg.retry.max_attempts = 5;
        cfg.retry.initial_delay_ms = 10;
        cfg.retry.max_delay_ms = 100;
        cfg.leader.key = "mca:test".into();
        cfg.leader.ttl_ms = 900;
        cfg.leader.renew_interval_ms = 300;

        let retry = to_retry_policy(&cfg);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(10));

        let leader = to_leader_config(&cfg, Some("node-a"));
        assert_eq!(leader.holder, "node-a");
        assert_eq!(leader.key, "mca:test");
        assert_eq!(leader.ttl, Duration::from_millis(900));
        assert_eq!(leader.renew_interval, Duration::from_millis(300));
    }

    #[test]
    fn test_allow_list_from_config() {
        let mut cfg = Config::default();
        cfg.capabilities.allowed_imports = vec!["os".into(), "json".into()];
        let allow = to_allow_list(&cfg);
        assert!(allow.permits("os"));
        assert!(!allow.permits("net"));
    }
}
