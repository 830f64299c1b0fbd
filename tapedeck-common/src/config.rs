//! Configuration loading and API key resolution
//!
//! Resolution priority for the analysis service API key: ENV → TOML.
//! The environment wins because batch runs are usually driven from scripts
//! that export credentials per invocation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable holding the analysis service API key
pub const API_KEY_ENV: &str = "TAPEDECK_API_KEY";

/// TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Analysis service API key (fallback when ENV is unset)
    pub api_key: Option<String>,
    /// Maximum concurrently processed items
    pub concurrency: Option<usize>,
    /// Maximum remote call attempts before a phase fails
    pub max_attempts: Option<u32>,
}

/// Default configuration file path: `~/.config/tapedeck/tapedeck.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tapedeck").join("tapedeck.toml"))
}

/// Load TOML configuration from an explicit path, or the default location.
///
/// A missing file is not an error; it yields the default (empty) config.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(TomlConfig::default()),
        },
    };

    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig =
        toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!(path = %path.display(), "Loaded TOML configuration");
    Ok(config)
}

/// Resolve the analysis service API key from ENV → TOML priority
pub fn resolve_api_key(toml_config: &TomlConfig) -> Result<String> {
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .api_key
        .as_ref()
        .filter(|k| is_valid_key(k))
        .cloned();

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "API key found in both {} and TOML config. Using environment (highest priority).",
            API_KEY_ENV
        );
    }

    if let Some(key) = env_key {
        info!("API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Analysis service API key not configured. Configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: ~/.config/tapedeck/tapedeck.toml (api_key = \"your-key\")",
        API_KEY_ENV
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
