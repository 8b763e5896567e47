//! Subcommand implementations.

use std::path::{Path, PathBuf};

use mca_config::{Config, ResolvedConfig};
use mca_core::Container;
use mca_telemetry::Metrics;

use crate::config_bridge;

pub(crate) mod config;
pub(crate) mod extensions;
pub(crate) mod leader;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Colored tables for a terminal.
    Pretty,
    /// One JSON document on stdout.
    Json,
}

/// Everything a command needs from the process environment.
///
/// The container carries the caches sized by `[cache]`; every registry a
/// command builds shares it.
pub(crate) struct HostContext {
    resolved: ResolvedConfig,
    base: PathBuf,
    format: OutputFormat,
    container: Container,
    metrics: Metrics,
}

impl HostContext {
    pub(crate) fn new(resolved: ResolvedConfig, base: PathBuf, format: OutputFormat) -> Self {
        let metrics = Metrics::new();
        let container = config_bridge::host_container(&resolved.config, &metrics);
        Self {
            resolved,
            base,
            format,
            container,
            metrics,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.resolved.config
    }

    pub(crate) fn resolved(&self) -> &ResolvedConfig {
        &self.resolved
    }

    /// Directory relative config paths resolve against.
    pub(crate) fn base(&self) -> &Path {
        &self.base
    }

    pub(crate) fn container(&self) -> &Container {
        &self.container
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
