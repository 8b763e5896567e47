//! Extension manifests embedded in the module's `mca.manifest` custom section.

use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{LoadError, LoadResult};

/// Priority used when the manifest does not set one. Lower loads first.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Dependency name that refers to the host itself.
pub const HOST_DEPENDENCY: &str = "core";

/// Identity and load ordering of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionManifest {
    /// Logical name; registrations are keyed by it.
    pub name: String,
    /// Extension version.
    pub version: Version,
    /// Load order, ascending.
    pub priority: i32,
    /// Required extensions (or [`HOST_DEPENDENCY`]).
    pub dependencies: Vec<Dependency>,
    /// Free-form description.
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    priority: Option<i32>,
    #[serde(default)]
    dependencies: Vec<String>,
    description: Option<String>,
}

impl ExtensionManifest {
    /// Manifest for a module that does not embed one.
    #[must_use]
    pub fn fallback(stem: &str) -> Self {
        Self {
            name: stem.to_string(),
            version: Version::new(0, 0, 0),
            priority: DEFAULT_PRIORITY,
            dependencies: Vec::new(),
            description: None,
        }
    }

    /// Parse a manifest section. Missing fields fall back to the file stem,
    /// version `0.0.0` and [`DEFAULT_PRIORITY`].
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidManifest`] on malformed JSON, an invalid
    /// name, version or dependency.
    pub fn parse(section: &[u8], stem: &str) -> LoadResult<Self> {
        let raw: RawManifest = serde_json::from_slice(section)
            .map_err(|e| LoadError::InvalidManifest(e.to_string()))?;

        let name = raw.name.unwrap_or_else(|| stem.to_string());
        validate_name(&name)?;

        let version = match raw.version {
            Some(v) => Version::parse(&v)
                .map_err(|e| LoadError::InvalidManifest(format!("version {v:?}: {e}")))?,
            None => Version::new(0, 0, 0),
        };

        let dependencies = raw
            .dependencies
            .iter()
            .map(String::as_str)
            .map(Dependency::parse)
            .collect::<LoadResult<Vec<_>>>()?;

        if dependencies.iter().any(|d| d.name == name) {
            return Err(LoadError::InvalidManifest(format!(
                "extension {name} depends on itself"
            )));
        }

        Ok(Self {
            name,
            version,
            priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
            dependencies,
            description: raw.description,
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn validate_name(name: &str) -> LoadResult<()> {
    if name.is_empty() {
        return Err(LoadError::InvalidManifest("name must not be empty".into()));
    }
    if let Some(bad) = name.chars().find(|c| !is_name_char(*c)) {
        return Err(LoadError::InvalidManifest(format!(
            "name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// A required extension and the versions that satisfy it.
///
/// Written as `name` or `name<requirement>`, e.g. `parser>=1.0, <2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Required extension name.
    pub name: String,
    /// Accepted versions.
    pub requirement: VersionReq,
}

impl Dependency {
    /// Parse `name` or `name<requirement>`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidManifest`] if the name is empty or the
    /// requirement does not parse.
    pub fn parse(raw: &str) -> LoadResult<Self> {
        let raw = raw.trim();
        let split = raw.find(|c| !is_name_char(c)).unwrap_or(raw.len());
        let (name, requirement) = raw.split_at(split);
        validate_name(name)
            .map_err(|_| LoadError::InvalidManifest(format!("dependency {raw:?} has no name")))?;

        let requirement = requirement.trim();
        let requirement = if requirement.is_empty() {
            VersionReq::STAR
        } else {
            VersionReq::parse(requirement)
                .map_err(|e| LoadError::InvalidManifest(format!("dependency {raw:?}: {e}")))?
        };

        Ok(Self {
            name: name.to_string(),
            requirement,
        })
    }

    /// Whether `version` satisfies the requirement.
    #[must_use]
    pub fn accepts(&self, version: &Version) -> bool {
        self.requirement.matches(version)
    }

    /// Whether this dependency refers to the host.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.name == HOST_DEPENDENCY
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requirement == VersionReq::STAR {
            f.write_str(&self.name)
        } else {
            write!(f, "{}{}", self.name, self.requirement)
        }
    }
}

impl Serialize for Dependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_uses_stem() {
        let m = ExtensionManifest::fallback("sentiment");
        assert_eq!(m.name, "sentiment");
        assert_eq!(m.version, Version::new(0, 0, 0));
        assert_eq!(m.priority, DEFAULT_PRIORITY);
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn test_parse_full_manifest() {
        let m = ExtensionManifest::parse(
            br#"{"name":"tagger","version":"1.2.0","priority":5,
                 "dependencies":["parser>=1.0, <2","core>=0.1"],"description":"tags"}"#,
            "file",
        )
        .unwrap();
        assert_eq!(m.name, "tagger");
        assert_eq!(m.version, Version::new(1, 2, 0));
        assert_eq!(m.priority, 5);
        assert_eq!(m.dependencies[0].name, "parser");
        assert!(m.dependencies[0].accepts(&Version::new(1, 4, 0)));
        assert!(!m.dependencies[0].accepts(&Version::new(2, 0, 0)));
        assert!(m.dependencies[1].is_host());
        assert_eq!(m.description.as_deref(), Some("tags"));
    }

    #[test]
    fn test_parse_defaults_missing_fields() {
        let m = ExtensionManifest::parse(b"{}", "stem").unwrap();
        assert_eq!(m, ExtensionManifest::fallback("stem"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ExtensionManifest::parse(b"not json", "x").is_err());
        assert!(ExtensionManifest::parse(br#"{"version":"one"}"#, "x").is_err());
        assert!(ExtensionManifest::parse(br#"{"name":"a b"}"#, "x").is_err());
        assert!(ExtensionManifest::parse(br#"{"unknown":1}"#, "x").is_err());
        assert!(ExtensionManifest::parse(br#"{"dependencies":[">=1"]}"#, "x").is_err());
        assert!(ExtensionManifest::parse(br#"{"dependencies":["x"]}"#, "x").is_err());
    }

    #[test]
    fn test_dependency_parse_forms() {
        let bare = Dependency::parse("parser").unwrap();
        assert_eq!(bare.requirement, VersionReq::STAR);
        assert_eq!(bare.to_string(), "parser");

        let ranged = Dependency::parse("  parser >=1.0, <2 ").unwrap();
        assert_eq!(ranged.name, "parser");
        assert_eq!(ranged.to_string(), "parser>=1.0, <2");

        assert!(Dependency::parse("parser>=banana").is_err());
    }

    #[test]
    fn test_dependency_serializes_as_string() {
        let dep = Dependency::parse("parser^1.2").unwrap();
        assert_eq!(serde_json::to_value(&dep).unwrap(), serde_json::json!("parser^1.2"));
    }
}
