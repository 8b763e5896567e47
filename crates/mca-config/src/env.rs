//! `MCA_*` environment overrides.
//!
//! Applied after every file layer, so an environment variable always wins.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Overrides the global log level (`logging.level`).
pub const ENV_LOG_LEVEL: &str = "MCA_LOG_LEVEL";
/// Overrides the extension directory (`extensions.dir`).
pub const ENV_EXTENSIONS_DIR: &str = "MCA_EXTENSIONS_DIR";
/// Overrides the signature requirement (`trust.required`).
pub const ENV_SIGNATURE_REQUIRED: &str = "MCA_SIGNATURE_REQUIRED";

/// Collect the `MCA_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().filter(|(k, _)| k.starts_with("MCA_")).collect()
}

/// Apply recognised overrides to the merged tree. Returns how many applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a boolean variable has an
/// unrecognised value.
pub fn apply_env_overrides(merged: &mut toml::Value, env: &HashMap<String, String>) -> ConfigResult<usize> {
    let mut applied: usize = 0;

    if let Some(level) = env.get(ENV_LOG_LEVEL) {
        set(merged, "logging", "level", toml::Value::String(level.clone()));
        applied = applied.saturating_add(1);
    }
    if let Some(dir) = env.get(ENV_EXTENSIONS_DIR) {
        set(merged, "extensions", "dir", toml::Value::String(dir.clone()));
        applied = applied.saturating_add(1);
    }
    if let Some(raw) = env.get(ENV_SIGNATURE_REQUIRED) {
        let required = parse_bool(raw).ok_or_else(|| ConfigError::EnvError {
            var_name: ENV_SIGNATURE_REQUIRED.to_owned(),
            message: format!("expected true/false, got '{raw}'"),
        })?;
        set(merged, "trust", "required", toml::Value::Boolean(required));
        applied = applied.saturating_add(1);
    }

    Ok(applied)
}

fn set(merged: &mut toml::Value, section: &str, field: &str, value: toml::Value) {
    let Some(root) = merged.as_table_mut() else {
        return;
    };
    let table = root
        .entry(section)
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    if let Some(table) = table.as_table_mut() {
        debug!(section, field, "applied environment override");
        table.insert(field.to_owned(), value);
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> toml::Value {
        toml::from_str("[trust]\nrequired = true\n[logging]\nlevel = \"info\"\n").unwrap()
    }

    #[test]
    fn test_overrides_applied() {
        let mut merged = base();
        let env = HashMap::from([
            (ENV_LOG_LEVEL.to_owned(), "debug".to_owned()),
            (ENV_SIGNATURE_REQUIRED.to_owned(), "no".to_owned()),
            (ENV_EXTENSIONS_DIR.to_owned(), "/opt/mca/ext".to_owned()),
        ]);

        assert_eq!(apply_env_overrides(&mut merged, &env).unwrap(), 3);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["trust"]["required"].as_bool(), Some(false));
        assert_eq!(merged["extensions"]["dir"].as_str(), Some("/opt/mca/ext"));
    }

    #[test]
    fn test_bad_bool_rejected() {
        let mut merged = base();
        let env = HashMap::from([(ENV_SIGNATURE_REQUIRED.to_owned(), "maybe".to_owned())]);
        let err = apply_env_overrides(&mut merged, &env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { ref var_name, .. } if var_name == ENV_SIGNATURE_REQUIRED));
    }

    #[test]
    fn test_no_vars_no_change() {
        let mut merged = base();
        assert_eq!(apply_env_overrides(&mut merged, &HashMap::new()).unwrap(), 0);
        assert_eq!(merged, base());
    }
}
