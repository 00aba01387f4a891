// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered `scan.toml` configuration: a file supplies defaults, CLI flags
//! override them. Every field is optional so an absent file (or an absent
//! field) simply falls through to [`scan_core::Opts::default`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Parsed `scan.toml` contents. Every field is optional; CLI flags take
/// precedence when both are present.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct FileConfig {
    /// Default worker pool size.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Default region selection (comma-expanded before reaching here).
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// Default service selection, `no-`-prefixed entries excluded.
    #[serde(default)]
    pub services: Option<Vec<String>>,
    /// Default hierarchy template or numeric depth, as a string either way.
    #[serde(default)]
    pub hier: Option<String>,
    /// Emit `#stats` subtree aggregates by default.
    #[serde(default)]
    pub stats: Option<bool>,
    /// Skip compaction by default.
    #[serde(default)]
    pub raw: Option<bool>,
    /// Emit compact JSON by default.
    #[serde(default)]
    pub min: Option<bool>,
    /// Skip non-root links by default.
    #[serde(default)]
    pub roots_only: Option<bool>,
}

/// Errors found while validating a parsed [`FileConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `workers` was present but zero.
    ZeroWorkers,
    /// `services` named an entry that both `no-`-excludes and includes the
    /// same name.
    ContradictoryService(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroWorkers => write!(f, "workers must be at least 1"),
            ConfigError::ContradictoryService(name) => {
                write!(f, "service '{name}' is both included and excluded (no-{name})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load `scan.toml` from `path`, or return the default (empty) config if
/// `path` is `None` and no `scan.toml` exists in the current directory.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FileConfig> {
    let resolved = match path {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let default = Path::new("scan.toml");
            default.is_file().then(|| default.to_path_buf())
        }
    };
    let Some(path) = resolved else {
        return Ok(FileConfig::default());
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config file '{}': {e}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file '{}': {e}", path.display()))?;
    Ok(config)
}

/// Validate a parsed [`FileConfig`], returning every semantic error found.
pub fn validate_config(config: &FileConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if let Some(0) = config.workers {
        errors.push(ConfigError::ZeroWorkers);
    }

    if let Some(services) = &config.services {
        for name in services {
            if let Some(excluded) = name.strip_prefix("no-") {
                if services.iter().any(|s| s == excluded) {
                    errors.push(ConfigError::ContradictoryService(excluded.to_string()));
                }
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
