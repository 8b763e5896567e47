//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use tracing::warn;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Upper bound for the executor pool.
const MAX_WORKERS: usize = 256;
/// WASM32 address space in 64 KiB pages.
const MAX_MEMORY_PAGES: u32 = 65_536;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_trust(config)?;
    validate_capabilities(config)?;
    validate_extensions(config)?;
    validate_executor(config)?;
    validate_cache(config)?;
    validate_retry(config)?;
    validate_leader(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(l.level.to_ascii_lowercase().as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'; expected one of: trace, debug, info, warn, error", l.level),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'; expected one of: pretty, compact, json, full", l.format),
        ));
    }
    Ok(())
}

fn validate_trust(config: &Config) -> ConfigResult<()> {
    let t = &config.trust;
    for (i, pem) in t.public_keys.iter().enumerate() {
        if !pem.contains("-----BEGIN") {
            return Err(invalid(
                &format!("trust.public_keys[{i}]"),
                "expected PEM-encoded key material",
            ));
        }
    }
    if t.required && t.public_keys.is_empty() {
        warn!("trust.required is set but no public keys are configured; every extension will be rejected");
    }
    Ok(())
}

fn validate_capabilities(config: &Config) -> ConfigResult<()> {
    for name in &config.capabilities.allowed_imports {
        if name.is_empty() || name.contains(['.', ':', '/']) {
            return Err(invalid(
                "capabilities.allowed_imports",
                format!("'{name}' is not a top-level module name"),
            ));
        }
    }
    Ok(())
}

fn validate_extensions(config: &Config) -> ConfigResult<()> {
    let e = &config.extensions;
    if e.dir.trim().is_empty() {
        return Err(invalid("extensions.dir", "must not be empty"));
    }
    if e.entry_point.trim().is_empty() {
        return Err(invalid("extensions.entry_point", "must not be empty"));
    }
    if e.call_timeout_ms == 0 {
        return Err(invalid("extensions.call_timeout_ms", "must be greater than 0"));
    }
    if e.memory_max_pages == 0 || e.memory_max_pages > MAX_MEMORY_PAGES {
        return Err(invalid(
            "extensions.memory_max_pages",
            format!("must be between 1 and {MAX_MEMORY_PAGES}"),
        ));
    }
    Ok(())
}

fn validate_executor(config: &Config) -> ConfigResult<()> {
    let w = config.executor.workers;
    if w == 0 || w > MAX_WORKERS {
        return Err(invalid("executor.workers", format!("must be between 1 and {MAX_WORKERS}")));
    }
    Ok(())
}

fn validate_cache(config: &Config) -> ConfigResult<()> {
    if config.cache.max_entries == 0 {
        return Err(invalid("cache.max_entries", "must be greater than 0"));
    }
    Ok(())
}

fn validate_retry(config: &Config) -> ConfigResult<()> {
    let r = &config.retry;
    if r.max_attempts == 0 {
        return Err(invalid("retry.max_attempts", "must be at least 1"));
    }
    if r.initial_delay_ms > r.max_delay_ms {
        return Err(invalid("retry.initial_delay_ms", "must not exceed retry.max_delay_ms"));
    }
    if !r.multiplier.is_finite() || r.multiplier < 1.0 {
        return Err(invalid("retry.multiplier", "must be a finite number >= 1.0"));
    }
    if !(0.0..=1.0).contains(&r.jitter) {
        return Err(invalid("retry.jitter", "must be between 0.0 and 1.0"));
    }
    Ok(())
}

fn validate_leader(config: &Config) -> ConfigResult<()> {
    let l = &config.leader;
    if l.key.trim().is_empty() {
        return Err(invalid("leader.key", "must not be empty"));
    }
    if l.ttl_ms == 0 {
        return Err(invalid("leader.ttl_ms", "must be greater than 0"));
    }
    if l.renew_interval_ms == 0 || l.renew_interval_ms >= l.ttl_ms {
        return Err(invalid(
            "leader.renew_interval_ms",
            "must be greater than 0 and shorter than leader.ttl_ms",
        ));
    }
    Ok(())
}
