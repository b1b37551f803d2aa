//! Link configuration management

use common::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_read_chunk() -> usize {
    1024
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub link: LinkSettings,
}

/// Settings for the serial link core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Default log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on bytes returned by a single one-shot read; also the
    /// inbound drain buffer size
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            read_chunk: default_read_chunk(),
        }
    }
}

impl LinkConfig {
    /// Default config location: `<config dir>/radiolink/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("radiolink").join("config.toml"))
            .ok_or_else(|| LinkError::Config("Could not determine config directory".to_string()))
    }

    /// Load from `path`, falling back to defaults when the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| LinkError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    /// Write the config to `path`, creating parent directories as needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| LinkError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }
}
