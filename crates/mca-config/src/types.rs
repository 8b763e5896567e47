//! Configuration types for the extension host.
//!
//! All types in this module are self-contained with no dependencies on other
//! internal mca crates. Conversion into domain types happens at the
//! integration boundary. Every struct implements [`Default`] with the same
//! values as the embedded `defaults.toml`, so a bare `[section]` header
//! produces a working configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging level, format and per-crate directives.
    pub logging: LoggingSection,
    /// Signature requirements and trusted keys.
    pub trust: TrustSection,
    /// Capability allow-list applied to every extension.
    pub capabilities: CapabilitiesSection,
    /// Extension discovery and runtime limits.
    pub extensions: ExtensionsSection,
    /// Task executor pool.
    pub executor: ExecutorSection,
    /// Result cache limits.
    pub cache: CacheSection,
    /// Retry behaviour for failed work units.
    pub retry: RetrySection,
    /// Leader election.
    pub leader: LeaderSection,
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["mca_extensions=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// TrustSection
// ---------------------------------------------------------------------------

/// Extension signature policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustSection {
    /// Reject extensions without a valid signature. When `false`, unsigned
    /// extensions load flagged as unverified.
    pub required: bool,
    /// Verify a signature that is present even when not required.
    pub verify_if_present: bool,
    /// PEM-encoded trusted public keys (RSA or ECDSA P-256).
    pub public_keys: Vec<String>,
}

impl Default for TrustSection {
    fn default() -> Self {
        Self {
            required: true,
            verify_if_present: true,
            public_keys: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilitiesSection
// ---------------------------------------------------------------------------

/// Import allow-list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSection {
    /// Permitted top-level import module names.
    pub allowed_imports: Vec<String>,
}

impl Default for CapabilitiesSection {
    fn default() -> Self {
        Self {
            allowed_imports: vec!["extism".to_owned(), "mca".to_owned()],
        }
    }
}

// ---------------------------------------------------------------------------
// ExtensionsSection
// ---------------------------------------------------------------------------

/// Extension discovery and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsSection {
    /// Directory scanned for `*.wasm` extensions.
    pub dir: String,
    /// Exported function every extension must provide.
    pub entry_point: String,
    /// Wall-clock limit for a single extension call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Linear memory limit in 64 KiB pages.
    pub memory_max_pages: u32,
}

impl Default for ExtensionsSection {
    fn default() -> Self {
        Self {
            dir: "extensions".to_owned(),
            entry_point: "mca_analyze".to_owned(),
            call_timeout_ms: 5_000,
            memory_max_pages: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorSection
// ---------------------------------------------------------------------------

/// Task executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Number of concurrently running work units.
    pub workers: usize,
    /// How long an explicit drain waits for in-flight work, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            workers: 4,
            drain_timeout_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheSection
// ---------------------------------------------------------------------------

/// Result cache limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum number of cached results.
    pub max_entries: usize,
    /// Time-to-live of a cached result, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 1_024,
            ttl_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// RetrySection
// ---------------------------------------------------------------------------

/// Retry behaviour for failed work units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier applied after each attempt.
    pub multiplier: f64,
    /// Random jitter as a fraction of the delay (`0.0..=1.0`).
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

// ---------------------------------------------------------------------------
// LeaderSection
// ---------------------------------------------------------------------------

/// Leader election settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderSection {
    /// Run the leader coordinator at all.
    pub enabled: bool,
    /// Lock key shared by every instance of the fleet.
    pub key: String,
    /// Lease time-to-live, in milliseconds.
    pub ttl_ms: u64,
    /// Renewal period, in milliseconds. Must be shorter than `ttl_ms`.
    pub renew_interval_ms: u64,
    /// Directory holding lease files. Unset means an in-process lock.
    pub lock_dir: Option<String>,
}

impl Default for LeaderSection {
    fn default() -> Self {
        Self {
            enabled: false,
            key: "mca:leader".to_owned(),
            ttl_ms: 10_000,
            renew_interval_ms: 3_000,
            lock_dir: None,
        }
    }
}
