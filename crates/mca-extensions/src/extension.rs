//! Registered extensions and the host/guest analysis protocol.
//!
//! The host calls the entry point with
//! `{"text": <analysis text>, "results": [<findings so far>]}` and expects
//! `{"findings": [..], "events": [{"type": .., "payload": {..}}]}` back.
//! Findings are appended to the shared [`AnalysisResults`]; events are
//! published on the bus under [`EventType::guest`] names, with the
//! `extension` payload field set by the host.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use mca_core::{AnalysisResults, Container, Finding, analysis_results, analysis_text};
use mca_crypto::{TrustStatus, TrustVerdict};
use mca_events::{Event, EventBus, EventType};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{Dependency, ExtensionManifest};
use crate::runtime::ExtensionInstance;

#[derive(Serialize)]
struct GuestInput<'a> {
    text: &'a str,
    results: Vec<Finding>,
}

#[derive(Deserialize)]
struct GuestOutput {
    #[serde(default)]
    findings: Vec<Value>,
    #[serde(default)]
    events: Vec<GuestEvent>,
}

#[derive(Deserialize)]
struct GuestEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

/// What one analysis call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Findings appended to the shared results.
    pub findings: usize,
    /// Events published on the bus.
    pub events: usize,
}

/// Summary row for status listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    /// Extension name.
    pub name: String,
    /// Extension version.
    pub version: Version,
    /// Load priority.
    pub priority: i32,
    /// Declared dependencies.
    pub dependencies: Vec<Dependency>,
    /// Trust outcome.
    pub trust: TrustStatus,
    /// Hex SHA-256 of the module.
    pub digest: String,
    /// Fingerprint of the key that signed it.
    pub signed_by: Option<String>,
    /// Module path.
    pub path: PathBuf,
}

/// An extension that passed every check and was instantiated.
pub struct LoadedExtension {
    manifest: ExtensionManifest,
    path: PathBuf,
    verdict: TrustVerdict,
    entry_point: String,
    instance: Mutex<Box<dyn ExtensionInstance>>,
}

impl LoadedExtension {
    pub(crate) fn new(
        manifest: ExtensionManifest,
        path: PathBuf,
        verdict: TrustVerdict,
        entry_point: String,
        instance: Box<dyn ExtensionInstance>,
    ) -> Self {
        Self {
            manifest,
            path,
            verdict,
            entry_point,
            instance: Mutex::new(instance),
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Extension version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    /// Parsed manifest.
    #[must_use]
    pub fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    /// Module path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Trust verdict for the loaded bytes.
    #[must_use]
    pub fn verdict(&self) -> &TrustVerdict {
        &self.verdict
    }

    /// `Verified` or `Unverified`.
    #[must_use]
    pub fn trust(&self) -> TrustStatus {
        self.verdict.status
    }

    /// Entry-point export name.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Summary row.
    #[must_use]
    pub fn status(&self) -> ExtensionStatus {
        ExtensionStatus {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            priority: self.manifest.priority,
            dependencies: self.manifest.dependencies.clone(),
            trust: self.verdict.status,
            digest: self.verdict.digest.to_hex(),
            signed_by: self.verdict.signed_by.as_ref().map(ToString::to_string),
            path: self.path.clone(),
        }
    }

    /// Call the entry point with a raw JSON document. Calls are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Invocation`] if the guest fails.
    pub fn call(&self, input: &str) -> RegistryResult<String> {
        let mut instance = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        instance
            .call(&self.entry_point, input)
            .map_err(|source| RegistryError::Invocation {
                name: self.manifest.name.clone(),
                source,
            })
    }

    /// Run one analysis pass against the context installed in `container`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if the context is missing, the guest
    /// fails, or its output is not a valid result document. Nothing is
    /// appended or published in that case.
    pub fn analyze(&self, container: &Container, bus: &EventBus) -> RegistryResult<AnalysisReport> {
        let text = analysis_text(container)?;
        let results: std::sync::Arc<AnalysisResults> = analysis_results(container)?;

        let input = serde_json::to_string(&GuestInput {
            text: text.as_str(),
            results: results.snapshot(),
        })
        .map_err(|source| RegistryError::InvalidOutput {
            name: self.manifest.name.clone(),
            source,
        })?;

        let output = self.call(&input)?;
        let output: GuestOutput =
            serde_json::from_str(&output).map_err(|source| RegistryError::InvalidOutput {
                name: self.manifest.name.clone(),
                source,
            })?;

        let report = AnalysisReport {
            findings: output.findings.len(),
            events: output.events.len(),
        };

        for detail in output.findings {
            results.append(Finding {
                extension: self.manifest.name.clone(),
                detail,
            });
        }
        for event in output.events {
            let mut published = Event::new(EventType::guest(&event.event_type));
            published.payload = event.payload;
            // The host owns attribution.
            published.payload.insert(
                "extension".to_string(),
                Value::String(self.manifest.name.clone()),
            );
            bus.publish(published);
        }

        debug!(
            extension = %self.manifest.name,
            findings = report.findings,
            events = report.events,
            "Extension analysis complete"
        );
        Ok(report)
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version.to_string())
            .field("path", &self.path)
            .field("trust", &self.verdict.status)
            .finish_non_exhaustive()
    }
}
