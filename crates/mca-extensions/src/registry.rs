//! Extension registry and loader.
//!
//! Every candidate goes through the same pipeline, strictly in order:
//!
//! 1. read the module once and verify its digest and signature
//! 2. scan the verified bytes against the capability allow-list
//! 3. parse the embedded manifest and check the entry-point export
//! 4. check dependencies against what is already registered
//! 5. instantiate through the [`ExtensionRuntime`] and register
//!
//! A failure at any step produces a [`Rejection`] that is kept for
//! diagnostics and never becomes callable. Registering a name that is
//! already present evicts the previous extension.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use mca_core::{Container, Finding, ResultCache, install_analysis};
use mca_crypto::{Sha256Digest, TrustPolicy, VerifiedArtifact};
use mca_events::{Event, EventBus, EventType, panic_message};
use mca_telemetry::Metrics;
use mca_telemetry::metrics::names;
use semver::Version;
use tracing::{debug, info, warn};

use crate::descriptor::{ExtensionDescriptor, ExtensionHandle, RejectedCheck, Rejection};
use crate::discovery::Discovery;
use crate::error::{LoadError, RegistryError, RegistryResult};
use crate::extension::{ExtensionStatus, LoadedExtension};
use crate::manifest::{Dependency, ExtensionManifest};
use crate::runtime::{DEFAULT_ENTRY_POINT, ExtensionRuntime};
use crate::scanner::{CapabilityAllowList, scan};

/// Container key prefix for registered extensions.
pub const CONTAINER_KEY_PREFIX: &str = "extension:";

/// Container key of the extension named `name`.
#[must_use]
pub fn container_key(name: &str) -> String {
    format!("{CONTAINER_KEY_PREFIX}{name}")
}

/// Container key of the optional [`SummaryCache`].
pub const SUMMARY_CACHE_KEY: &str = "cache:analysis";

/// Memoized [`AnalysisSummary`] values keyed by [`ExtensionRegistry::summary_key`].
pub type SummaryCache = ResultCache<String, AnalysisSummary>;

fn summary_key(text: &str, extensions: &[Arc<LoadedExtension>]) -> String {
    let mut material = Sha256Digest::of(text.as_bytes()).to_hex();
    for ext in extensions {
        material.push('\n');
        material.push_str(ext.name());
        material.push(':');
        material.push_str(&ext.verdict().digest.to_hex());
    }
    Sha256Digest::of(material.as_bytes()).to_hex()
}

/// A candidate that passed every static check.
struct Prepared {
    descriptor: ExtensionDescriptor,
    artifact: VerifiedArtifact,
    manifest: ExtensionManifest,
}

#[derive(Default)]
struct RegistryState {
    loaded: HashMap<String, Arc<LoadedExtension>>,
    rejected: Vec<Rejection>,
}

/// Outcome of [`ExtensionRegistry::run_analysis`].
#[derive(Debug, Clone, Default)]
pub struct AnalysisSummary {
    /// Every finding in the shared results after the pass.
    pub findings: Vec<Finding>,
    /// Extensions whose call failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Builder for [`ExtensionRegistry`].
#[must_use]
pub struct ExtensionRegistryBuilder {
    policy: TrustPolicy,
    runtime: Arc<dyn ExtensionRuntime>,
    allow_list: CapabilityAllowList,
    entry_point: String,
    host_version: Option<Version>,
    bus: Option<EventBus>,
    container: Option<Container>,
    metrics: Option<Metrics>,
}

impl ExtensionRegistryBuilder {
    /// Set the capability allow-list. Defaults to empty (no imports).
    pub fn allow_list(mut self, allow_list: CapabilityAllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    /// Set the entry-point export name.
    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Set the version that `core` dependencies are checked against.
    pub fn host_version(mut self, version: Version) -> Self {
        self.host_version = Some(version);
        self
    }

    /// Publish lifecycle events on `bus`.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register loaded extensions in `container`.
    pub fn container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Record counters in `metrics`.
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the registry.
    pub fn build(self) -> ExtensionRegistry {
        let host_version = self.host_version.unwrap_or_else(|| {
            Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
        });
        ExtensionRegistry {
            policy: self.policy,
            runtime: self.runtime,
            allow_list: self.allow_list,
            entry_point: self.entry_point,
            host_version,
            bus: self.bus.unwrap_or_default(),
            container: self.container.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
            state: RwLock::new(RegistryState::default()),
        }
    }
}

/// Registry of loaded and rejected extensions.
pub struct ExtensionRegistry {
    policy: TrustPolicy,
    runtime: Arc<dyn ExtensionRuntime>,
    allow_list: CapabilityAllowList,
    entry_point: String,
    host_version: Version,
    bus: EventBus,
    container: Container,
    metrics: Metrics,
    state: RwLock<RegistryState>,
}

impl ExtensionRegistry {
    /// Start building a registry that verifies with `policy` and
    /// instantiates with `runtime`.
    pub fn builder(
        policy: TrustPolicy,
        runtime: Arc<dyn ExtensionRuntime>,
    ) -> ExtensionRegistryBuilder {
        ExtensionRegistryBuilder {
            policy,
            runtime,
            allow_list: CapabilityAllowList::default(),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            host_version: None,
            bus: None,
            container: None,
            metrics: None,
        }
    }

    /// Event bus lifecycle events are published on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Container loaded extensions are registered in.
    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Capability allow-list.
    #[must_use]
    pub fn allow_list(&self) -> &CapabilityAllowList {
        &self.allow_list
    }

    /// Host version used for `core` dependencies.
    #[must_use]
    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// Discover candidates in `dir` without loading them.
    #[must_use]
    pub fn discover(&self, dir: &Path) -> Discovery {
        Discovery::new(dir)
    }

    /// Load a single candidate.
    ///
    /// Dependencies must already be registered. Never panics on bad input:
    /// every failure is returned as [`ExtensionHandle::Rejected`].
    pub fn load(&self, descriptor: &ExtensionDescriptor) -> ExtensionHandle {
        let prepared = match self.prepare(descriptor) {
            Ok(p) => p,
            Err(rejection) => return self.reject(rejection),
        };
        if let Some(dep) = self.unsatisfied_dependency(&prepared.manifest) {
            let rejection = dependency_rejection(&prepared, &dep);
            return self.reject(rejection);
        }
        self.finish(prepared)
    }

    /// Load the module at `path`.
    pub fn load_file(&self, path: &Path) -> ExtensionHandle {
        self.load(&ExtensionDescriptor::from_path(path))
    }

    /// Re-read the module at `path` and swap it in.
    ///
    /// On success the previously registered extension with the same name is
    /// evicted. On failure the previous registration stays in place.
    pub fn reload(&self, path: &Path) -> ExtensionHandle {
        info!(path = %path.display(), "Reloading extension");
        self.load_file(path)
    }

    /// Discover and load every candidate in `dir`.
    ///
    /// Candidates are ordered by manifest priority (ascending, file name
    /// order within a priority) and registered in rounds until no further
    /// candidate's dependencies can be satisfied. Whatever remains is
    /// rejected with [`RejectedCheck::Dependency`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Discovery`] if `dir` cannot be read.
    pub fn load_all(&self, dir: &Path) -> RegistryResult<Vec<ExtensionHandle>> {
        std::fs::read_dir(dir).map_err(|source| RegistryError::Discovery {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut handles = Vec::new();
        let mut pending = Vec::new();
        for descriptor in &Discovery::new(dir) {
            match self.prepare(&descriptor) {
                Ok(p) => pending.push(p),
                Err(rejection) => handles.push(self.reject(rejection)),
            }
        }
        pending.sort_by_key(|p| p.manifest.priority);

        let mut round = 0u32;
        while !pending.is_empty() {
            round = round.saturating_add(1);
            let before = pending.len();
            let mut waiting = Vec::new();
            for prepared in pending {
                if self.unsatisfied_dependency(&prepared.manifest).is_some() {
                    waiting.push(prepared);
                } else {
                    handles.push(self.finish(prepared));
                }
            }
            debug!(
                round,
                finished = before.saturating_sub(waiting.len()),
                waiting = waiting.len(),
                "Load round complete"
            );
            pending = waiting;
            if pending.len() == before {
                break;
            }
        }

        for prepared in pending {
            if let Some(dep) = self.unsatisfied_dependency(&prepared.manifest) {
                let rejection = dependency_rejection(&prepared, &dep);
                handles.push(self.reject(rejection));
            }
        }

        let loaded = handles.iter().filter(|h| h.is_loaded()).count();
        info!(
            dir = %dir.display(),
            loaded,
            rejected = handles.len().saturating_sub(loaded),
            "Loaded extensions from directory"
        );
        Ok(handles)
    }

    /// Unregister `name`. Returns whether it was registered.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.write_state().loaded.remove(name);
        let Some(ext) = removed else {
            return false;
        };
        self.container.remove(&container_key(name));
        info!(extension = %name, version = %ext.version(), "Unloaded extension");
        self.bus.publish(
            Event::new(EventType::ExtensionUnloaded)
                .with("name", name)
                .with("version", ext.version().to_string()),
        );
        true
    }

    /// Look up a registered extension.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<LoadedExtension>> {
        self.read_state().loaded.get(name).cloned()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read_state().loaded.contains_key(name)
    }

    /// Registered extensions in load order (priority, then name).
    #[must_use]
    pub fn extensions(&self) -> Vec<Arc<LoadedExtension>> {
        let mut all: Vec<_> = self.read_state().loaded.values().cloned().collect();
        all.sort_by(|a, b| {
            a.manifest()
                .priority
                .cmp(&b.manifest().priority)
                .then_with(|| a.name().cmp(b.name()))
        });
        all
    }

    /// Status rows for registered extensions, in load order.
    #[must_use]
    pub fn status(&self) -> Vec<ExtensionStatus> {
        self.extensions().iter().map(|e| e.status()).collect()
    }

    /// The latest rejection for each rejected path.
    #[must_use]
    pub fn rejected(&self) -> Vec<Rejection> {
        self.read_state().rejected.clone()
    }

    /// Number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().loaded.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_state().loaded.is_empty()
    }

    /// Install `text` as the analysis context and run every registered
    /// extension once, in load order.
    ///
    /// A failing or panicking extension is logged and skipped; the others
    /// still run.
    ///
    /// When a [`SummaryCache`] is registered under [`SUMMARY_CACHE_KEY`], a
    /// clean pass is memoized by [`Self::summary_key`]. A cached pass
    /// reinstalls the findings without calling any extension, so no guest
    /// events are published for it. Passes with failures are never cached.
    pub fn run_analysis(&self, text: &str) -> AnalysisSummary {
        let extensions = self.extensions();
        let cache = self.container.resolve::<SummaryCache>(SUMMARY_CACHE_KEY).ok();
        let key = cache.as_ref().map(|_| summary_key(text, &extensions));

        let cached = cache.as_ref().zip(key.as_ref()).and_then(|(c, k)| c.get(k));
        if let Some(summary) = cached {
            debug!(findings = summary.findings.len(), "Analysis served from cache");
            let results = install_analysis(&self.container, text);
            for finding in &summary.findings {
                results.append(finding.clone());
            }
            return summary;
        }

        let results = install_analysis(&self.container, text);
        let mut failed = Vec::new();

        for ext in extensions {
            let outcome = catch_unwind(AssertUnwindSafe(|| ext.analyze(&self.container, &self.bus)));
            let error = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(&*payload)),
            };
            warn!(extension = %ext.name(), error = %error, "Extension analysis failed; continuing");
            failed.push((ext.name().to_string(), error));
        }

        let summary = AnalysisSummary {
            findings: results.snapshot(),
            failed,
        };
        if let (Some(cache), Some(key), true) = (cache, key, summary.failed.is_empty()) {
            cache.insert(key, summary.clone());
        }
        summary
    }

    /// Cache key of an analysis of `text` by the currently loaded set.
    ///
    /// Covers the text and every extension's name and content digest in
    /// load order, so reloading a changed module never hits a stale entry.
    #[must_use]
    pub fn summary_key(&self, text: &str) -> String {
        summary_key(text, &self.extensions())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Steps 1-3: trust, capability scan, manifest and entry-point export.
    fn prepare(&self, descriptor: &ExtensionDescriptor) -> Result<Prepared, Rejection> {
        let stem = descriptor.stem();

        let artifact = self.policy.verify_artifact(descriptor.path()).map_err(|e| {
            Rejection::new(descriptor, stem, RejectedCheck::Trust, e.reason(), &e)
        })?;

        let info = scan(artifact.bytes(), &self.allow_list).map_err(|e| {
            Rejection::new(descriptor, stem, RejectedCheck::Capability, "disallowed imports", &e)
                .with_offending(e.offending().to_vec())
        })?;

        let manifest = match info.manifest_section() {
            Some(section) => ExtensionManifest::parse(section, stem).map_err(|e| {
                Rejection::new(descriptor, stem, RejectedCheck::Load, "invalid manifest", &e)
            })?,
            None => ExtensionManifest::fallback(stem),
        };

        if !info.exports_function(&self.entry_point) {
            let e = LoadError::MissingEntryPoint(self.entry_point.clone());
            return Err(Rejection::new(
                descriptor,
                &manifest.name,
                RejectedCheck::Load,
                "missing entry point",
                &e,
            ));
        }

        debug!(
            extension = %manifest.name,
            trust = %artifact.verdict().status,
            imports = info.imports().len(),
            "Extension passed static checks"
        );
        Ok(Prepared {
            descriptor: descriptor.clone(),
            artifact,
            manifest,
        })
    }

    /// Steps 4-5 for a candidate whose dependencies are satisfied.
    fn finish(&self, prepared: Prepared) -> ExtensionHandle {
        match self.instantiate(prepared) {
            Ok(ext) => self.register(ext),
            Err(rejection) => self.reject(rejection),
        }
    }

    fn unsatisfied_dependency(&self, manifest: &ExtensionManifest) -> Option<Dependency> {
        let state = self.read_state();
        manifest
            .dependencies
            .iter()
            .find(|dep| {
                if dep.is_host() {
                    !dep.accepts(&self.host_version)
                } else {
                    state
                        .loaded
                        .get(&dep.name)
                        .is_none_or(|ext| !dep.accepts(ext.version()))
                }
            })
            .cloned()
    }

    fn instantiate(&self, prepared: Prepared) -> Result<Arc<LoadedExtension>, Rejection> {
        let Prepared {
            descriptor,
            artifact,
            manifest,
        } = prepared;
        let name = manifest.name.clone();
        let load_failed = |e: LoadError, reason: &str| {
            Rejection::new(&descriptor, &name, RejectedCheck::Load, reason, &e)
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.runtime.instantiate(&manifest, artifact.bytes())
        }));
        let mut instance = match outcome {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => return Err(load_failed(e, "instantiation failed")),
            Err(payload) => {
                let e = LoadError::Panicked(panic_message(&*payload));
                return Err(load_failed(e, "instantiation panicked"));
            },
        };

        if !instance.has_entry_point(&self.entry_point) {
            let e = LoadError::MissingEntryPoint(self.entry_point.clone());
            return Err(load_failed(e, "missing entry point"));
        }

        Ok(Arc::new(LoadedExtension::new(
            manifest,
            PathBuf::from(descriptor.path()),
            artifact.verdict().clone(),
            self.entry_point.clone(),
            instance,
        )))
    }

    fn register(&self, ext: Arc<LoadedExtension>) -> ExtensionHandle {
        let name = ext.name().to_string();
        let evicted = {
            let mut state = self.write_state();
            state.rejected.retain(|r| r.path != ext.path());
            state.loaded.insert(name.clone(), Arc::clone(&ext))
        };

        self.container
            .register_instance(container_key(&name), Arc::clone(&ext));
        self.metrics.counter(names::EXTENSIONS_LOADED).inc();

        if let Some(old) = evicted {
            info!(
                extension = %name,
                old_version = %old.version(),
                new_version = %ext.version(),
                "Evicted extension replaced by a later registration"
            );
            self.bus.publish(
                Event::new(EventType::ExtensionEvicted)
                    .with("name", name.as_str())
                    .with("version", old.version().to_string())
                    .with("path", old.path().display().to_string())
                    .with("replaced_by", ext.version().to_string()),
            );
        }

        info!(
            extension = %name,
            version = %ext.version(),
            trust = %ext.trust(),
            digest = %ext.verdict().digest,
            "Loaded extension"
        );
        self.bus.publish(
            Event::new(EventType::ExtensionLoaded)
                .with("name", name.as_str())
                .with("version", ext.version().to_string())
                .with("trust", ext.trust().to_string())
                .with("digest", ext.verdict().digest.to_hex())
                .with("path", ext.path().display().to_string()),
        );

        ExtensionHandle::Loaded(ext)
    }

    fn reject(&self, rejection: Rejection) -> ExtensionHandle {
        {
            let mut state = self.write_state();
            state.rejected.retain(|r| r.path != rejection.path);
            state.rejected.push(rejection.clone());
        }
        self.metrics.counter(names::EXTENSIONS_REJECTED).inc();

        warn!(
            extension = %rejection.name,
            path = %rejection.path.display(),
            check = %rejection.check,
            reason = %rejection.reason,
            detail = %rejection.detail,
            "Rejected extension"
        );
        self.bus.publish(
            Event::new(EventType::ExtensionRejected)
                .with("name", rejection.name.as_str())
                .with("path", rejection.path.display().to_string())
                .with("check", rejection.check.to_string())
                .with("reason", rejection.reason.as_str()),
        );

        ExtensionHandle::Rejected(rejection)
    }
}

fn dependency_rejection(prepared: &Prepared, dep: &Dependency) -> Rejection {
    let e = LoadError::UnsatisfiedDependency(dep.to_string());
    Rejection::new(
        &prepared.descriptor,
        &prepared.manifest.name,
        RejectedCheck::Dependency,
        format!("unsatisfied dependency {dep}"),
        &e,
    )
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("ExtensionRegistry")
            .field("loaded", &state.loaded.len())
            .field("rejected", &state.rejected.len())
            .field("allow_list", &self.allow_list)
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}
