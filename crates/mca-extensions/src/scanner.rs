//! Static capability scanner.
//!
//! Walks the parsed section stream of a WebAssembly binary without
//! instantiating it. Every import's module string is reduced to its
//! top-level name (the prefix before the first `.`, `:` or `/`) and checked
//! against the [`CapabilityAllowList`]. Constructs that cannot be analysed
//! statically fail closed and are reported as marker names.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};
use wasmparser::{Encoding, ExternalKind, Parser, Payload, Validator};

use crate::error::{CapabilityError, CapabilityResult};

/// Name of the custom section holding the extension manifest.
pub const MANIFEST_SECTION: &str = "mca.manifest";

/// Reported for component-model binaries.
pub const COMPONENT_MODEL: &str = "<component-model>";

/// Reported for modules carrying dynamic-linking metadata.
pub const DYNAMIC_LINKING: &str = "<dynamic-linking>";

/// Reported when the binary cannot be parsed or validated.
pub const MALFORMED: &str = "<malformed>";

/// Set of top-level module names an extension may import from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityAllowList {
    names: BTreeSet<String>,
}

impl CapabilityAllowList {
    /// Build an allow-list from names. Surrounding whitespace is ignored.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Whether `top_level` is allowed. Matching is exact.
    #[must_use]
    pub fn permits(&self, top_level: &str) -> bool {
        self.names.contains(top_level)
    }

    /// Allowed names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of allowed names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether nothing is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for CapabilityAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Top-level component of an import module string.
///
/// `extism:host/env` is `extism`, `a.b.c` is `a`.
#[must_use]
pub fn top_level_name(module: &str) -> &str {
    module
        .split(['.', ':', '/'])
        .next()
        .unwrap_or(module)
}

/// One entry of a module's import section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    /// Full module string.
    pub module: String,
    /// Imported field name.
    pub name: String,
}

impl ImportRef {
    /// See [`top_level_name`].
    #[must_use]
    pub fn top_level(&self) -> &str {
        top_level_name(&self.module)
    }
}

/// What static inspection learned about a binary.
#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
    imports: Vec<ImportRef>,
    function_exports: Vec<String>,
    manifest: Option<Vec<u8>>,
    structural: BTreeSet<&'static str>,
}

impl ModuleInfo {
    /// Import section entries, in binary order.
    #[must_use]
    pub fn imports(&self) -> &[ImportRef] {
        &self.imports
    }

    /// Names of exported functions.
    #[must_use]
    pub fn function_exports(&self) -> &[String] {
        &self.function_exports
    }

    /// Whether a function named `name` is exported.
    #[must_use]
    pub fn exports_function(&self, name: &str) -> bool {
        self.function_exports.iter().any(|e| e == name)
    }

    /// Raw content of the [`MANIFEST_SECTION`] custom section.
    #[must_use]
    pub fn manifest_section(&self) -> Option<&[u8]> {
        self.manifest.as_deref()
    }

    /// Fail-closed markers raised during inspection.
    pub fn structural_violations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.structural.iter().copied()
    }

    /// Offending names under `allow_list`, sorted and de-duplicated.
    #[must_use]
    pub fn violations(&self, allow_list: &CapabilityAllowList) -> Vec<String> {
        let mut offending: BTreeSet<String> =
            self.structural.iter().map(|m| (*m).to_string()).collect();
        for import in &self.imports {
            let top = import.top_level();
            if !allow_list.permits(top) {
                offending.insert(top.to_string());
            }
        }
        offending.into_iter().collect()
    }
}

/// Inspect a binary without judging it.
///
/// Never fails: anything unreadable is recorded as a structural violation
/// and inspection stops at that point.
#[must_use]
pub fn inspect(bytes: &[u8]) -> ModuleInfo {
    let mut info = ModuleInfo::default();

    for payload in Parser::new(0).parse_all(bytes) {
        let payload = match payload {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "Unparseable WASM section");
                info.structural.insert(MALFORMED);
                return info;
            },
        };

        match payload {
            Payload::Version { encoding, .. } => {
                if encoding == Encoding::Component {
                    info.structural.insert(COMPONENT_MODEL);
                    return info;
                }
            },
            Payload::ImportSection(reader) => {
                for import in reader {
                    match import {
                        Ok(import) => info.imports.push(ImportRef {
                            module: import.module.to_string(),
                            name: import.name.to_string(),
                        }),
                        Err(e) => {
                            debug!(error = %e, "Unreadable import entry");
                            info.structural.insert(MALFORMED);
                            return info;
                        },
                    }
                }
            },
            Payload::ExportSection(reader) => {
                for export in reader {
                    match export {
                        Ok(export) if export.kind == ExternalKind::Func => {
                            info.function_exports.push(export.name.to_string());
                        },
                        Ok(_) => {},
                        Err(e) => {
                            debug!(error = %e, "Unreadable export entry");
                            info.structural.insert(MALFORMED);
                            return info;
                        },
                    }
                }
            },
            Payload::CustomSection(reader) => match reader.name() {
                "dylink" | "dylink.0" => {
                    info.structural.insert(DYNAMIC_LINKING);
                },
                MANIFEST_SECTION => {
                    if info.manifest.is_some() {
                        // Two manifests: which one applies is ambiguous.
                        info.structural.insert(MALFORMED);
                    } else {
                        info.manifest = Some(reader.data().to_vec());
                    }
                },
                _ => {},
            },
            _ => {},
        }
    }

    if let Err(e) = Validator::new().validate_all(bytes) {
        debug!(error = %e, "WASM validation failed");
        info.structural.insert(MALFORMED);
    }

    info
}

/// Inspect `bytes` and reject any import outside `allow_list`.
///
/// # Errors
///
/// Returns [`CapabilityError::Disallowed`] listing every offending name.
pub fn scan(bytes: &[u8], allow_list: &CapabilityAllowList) -> CapabilityResult<ModuleInfo> {
    let info = inspect(bytes);
    let offending = info.violations(allow_list);
    if offending.is_empty() {
        debug!(imports = info.imports.len(), "Capability scan passed");
        Ok(info)
    } else {
        warn!(offending = ?offending, allow_list = %allow_list, "Capability scan failed");
        Err(CapabilityError::Disallowed { offending })
    }
}
