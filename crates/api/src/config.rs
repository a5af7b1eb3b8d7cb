//! Service configuration
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file
//! (`PROCTOR_CONFIG`, default `proctor.toml`), then `PROCTOR__*` environment
//! variables with `__` separating nested keys
//! (e.g. `PROCTOR__PROCTOR__YAW_THRESHOLD_DEG=20`).

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File, FileFormat};
use perception::PerceptionConfig;
use proctor::ProctorConfig;
use serde::Deserialize;

pub const CONFIG_PATH_VAR: &str = "PROCTOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "proctor.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address
    pub bind_addr: String,

    /// Max log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,

    /// Directory for evidence snapshots; evidence is not persisted when unset
    pub evidence_dir: Option<PathBuf>,

    /// Idle-session sweep period
    pub eviction_interval_secs: u64,

    pub proctor: ProctorConfig,
    pub perception: PerceptionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            evidence_dir: None,
            eviction_interval_secs: 60,
            proctor: ProctorConfig::default(),
            perception: PerceptionConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from the file named by `PROCTOR_CONFIG` plus the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Load from `path` (may be missing) plus the environment
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("PROCTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
