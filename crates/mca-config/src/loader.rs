//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user file (`<config dir>/mca/config.toml`)
//! 3. Merge the explicit file, if one was given
//! 4. Apply `MCA_*` environment overrides
//! 5. Deserialize merged tree → `Config`
//! 6. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration together with the files that contributed to it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Files merged over the defaults, in precedence order.
    pub loaded_files: Vec<String>,
    /// Number of environment overrides applied.
    pub env_overrides: usize,
}

/// Inputs of a layered load. [`LoadOptions::from_environment`] fills them
/// from the running process.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Directory holding the user `config.toml`. `None` skips the user layer.
    pub user_config_dir: Option<PathBuf>,
    /// Explicit file, merged last. A missing explicit file is an error.
    pub explicit: Option<PathBuf>,
    /// Environment variables consulted for overrides.
    pub env: HashMap<String, String>,
}

impl LoadOptions {
    /// Options derived from the platform config directory and process env.
    #[must_use]
    pub fn from_environment(explicit: Option<&Path>) -> Self {
        Self {
            user_config_dir: user_config_dir(),
            explicit: explicit.map(Path::to_path_buf),
            env: collect_env_vars(),
        }
    }
}

/// Load the configuration with layered file precedence.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    // 1. Embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            origin: "embedded defaults".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    // 2. User config.
    if let Some(dir) = &options.user_config_dir {
        let user_path = dir.join("config.toml");
        if let Some(overlay) = try_load_file(&user_path)? {
            deep_merge(&mut merged, &overlay);
            loaded_files.push(user_path.display().to_string());
            info!(path = %user_path.display(), "loaded user config");
        }
    }

    // 3. Explicit config.
    if let Some(path) = &options.explicit {
        let overlay =
            try_load_file(path)?.ok_or_else(|| ConfigError::NotFound { path: path.clone() })?;
        deep_merge(&mut merged, &overlay);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded explicit config");
    }

    // 4. Environment overrides.
    let env_overrides = apply_env_overrides(&mut merged, &options.env)?;
    if env_overrides > 0 {
        debug!(count = env_overrides, "applied environment overrides");
    }

    // 5. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                origin: "merged config".to_owned(),
                source: e,
            })?;

    // 6. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

/// Load a config from a specific file path (no layering, no env).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::NotFound {
        path: path.to_path_buf(),
    })?;

    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            origin: path.display().to_string(),
            source: e,
        })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Serialize the embedded defaults, e.g. for `config init`-style output.
#[must_use]
pub fn defaults_toml() -> &'static str {
    DEFAULTS_TOML
}

/// Platform directory for the user config (`~/.config/mca` on Linux).
#[must_use]
pub fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "mca").map(|d| d.config_dir().to_path_buf())
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation (no separate exists/metadata checks).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            });
        },
    };

    // Size is checked on the content already read, not a prior stat.
    let size = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if size > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: MAX_CONFIG_FILE_SIZE,
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        origin: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}
