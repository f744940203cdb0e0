//! Registry configuration
//!
//! Settings come from, in increasing priority: built-in defaults, an
//! optional YAML or JSON file, and command-line flags. The bus URL is taken
//! from `NATS_SERVER_URL` unless a flag overrides it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::{HealthCheckerConfig, HEALTH_CHECK_INTERVAL_SECS, PROBE_TIMEOUT_SECS};

/// Bus URL used when nothing else is configured
pub const DEFAULT_NATS_URL: &str = "nats://0.0.0.0:4222";

/// Environment variable holding the bus URL
pub const NATS_URL_ENV: &str = "NATS_SERVER_URL";

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for `infermesh serve`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Seconds between full health-check cycles
    pub health_check_interval_secs: u64,

    /// Timeout for one backend probe in seconds
    pub probe_timeout_secs: u64,

    /// Path appended to a backend URL to list its models
    pub models_path: String,

    /// Backends known before any `new_server` announcement
    pub backends: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            probe_timeout_secs: PROBE_TIMEOUT_SECS,
            models_path: "/models".to_string(),
            backends: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Health checker settings derived from this config
    pub fn health_checker(&self) -> HealthCheckerConfig {
        HealthCheckerConfig {
            interval_secs: self.health_check_interval_secs,
            timeout_secs: self.probe_timeout_secs,
            models_path: self.models_path.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health_check_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if !self.models_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "models_path must start with '/': {}",
                self.models_path
            )));
        }
        Ok(())
    }

    /// Parse a config from text, as YAML unless `json` is set.
    /// Pure function - no I/O.
    pub fn from_str(content: &str, json: bool) -> Result<Self, ConfigError> {
        let config: RegistryConfig = if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load a config file. Files ending in `.json` are parsed as JSON, anything
/// else as YAML.
pub fn load_config_file(path: &Path) -> Result<RegistryConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let json = path.extension().and_then(|e| e.to_str()) == Some("json");
    RegistryConfig::from_str(&content, json)
}

/// `~/.infermesh/registry.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".infermesh").join("registry.yaml"))
}

/// Expand `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

/// Bus URL from the flag, then the environment, then the default
pub fn resolve_nats_url(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| std::env::var(NATS_URL_ENV).ok())
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_NATS_URL.to_string())
}
