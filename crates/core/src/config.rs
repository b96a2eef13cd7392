//! Configuration management
//!
//! Configuration lives in `<config_dir>/config.toml`. The directory is taken
//! from `STRATUS_CONFIG_DIR` when set, otherwise `dirs::config_dir()/stratus`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alias::Alias;
use crate::error::{Error, Result};
use crate::manifest::ManifestKind;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "STRATUS_CONFIG_DIR";

/// Default segment size: 5 GiB, the usual maximum single-object size
pub const DEFAULT_SEGMENT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

const CONFIG_FILE: &str = "config.toml";

/// Transfer defaults applied when a command does not override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    /// Objects larger than this are segmented; also the size of each segment
    pub segment_size: u64,

    /// Manifest strategy for segmented uploads
    pub manifest: ManifestKind,

    /// Process-wide bound on simultaneous network operations
    pub concurrency: usize,

    /// Persist the storage URL and token between invocations
    pub cache_auth: bool,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            manifest: ManifestKind::Dynamic,
            concurrency: 1,
            cache_auth: false,
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: TransferDefaults,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<Alias>,
}

impl Config {
    /// Check values that serde alone cannot validate
    pub fn validate(&self) -> Result<()> {
        if self.defaults.segment_size == 0 {
            return Err(Error::Config("segment_size must be at least 1".into()));
        }
        if self.defaults.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

/// Loads and saves [`Config`] at a fixed location
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Use the default configuration location
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: config_dir()?.join(CONFIG_FILE),
        })
    }

    /// Use an explicit configuration file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, returning defaults when the file does not exist
    pub fn load(&self) -> Result<Config> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No config file; using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", self.path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, creating the directory when needed
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Resolve the configuration directory
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|d| d.join("stratus"))
        .ok_or_else(|| Error::Config("cannot determine configuration directory".into()))
}
