//! Alias management
//!
//! An alias is a named set of credentials for one storage cluster, plus the
//! retry settings used for every request made through it.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Retry settings for requests made through an alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay unit; the n-th retry waits `n * initial_backoff_ms`
    pub initial_backoff_ms: u64,

    /// Upper bound for a single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

/// Credentials and connection settings for one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,

    /// Auth endpoint, e.g. `http://127.0.0.1:8080/auth/v1.0`
    pub auth_url: String,

    pub auth_user: String,

    pub auth_key: String,

    /// Tenant for v2 auth; defaults to the user when required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tenant: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Use internal (service network) endpoints
    #[serde(default)]
    pub snet: bool,

    /// Pre-issued storage URL; skips authentication together with `auth_token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl Alias {
    pub fn new(
        name: impl Into<String>,
        auth_url: impl Into<String>,
        auth_user: impl Into<String>,
        auth_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            auth_url: auth_url.into(),
            auth_user: auth_user.into(),
            auth_key: auth_key.into(),
            auth_tenant: None,
            region: None,
            snet: false,
            storage_url: None,
            auth_token: None,
            retry: None,
        }
    }

    /// Retry settings, falling back to defaults
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// True when the alias carries a ready-made storage URL and token
    pub fn is_preauthenticated(&self) -> bool {
        self.storage_url.is_some() && self.auth_token.is_some()
    }

    /// Check that the alias can be used to authenticate
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("alias name cannot be empty".into()));
        }
        if self.is_preauthenticated() {
            return Ok(());
        }
        if self.auth_url.is_empty() {
            return Err(Error::Config(format!("alias '{}' has no auth URL", self.name)));
        }
        url::Url::parse(&self.auth_url)
            .map_err(|e| Error::Config(format!("alias '{}': invalid auth URL: {e}", self.name)))?;
        Ok(())
    }
}

/// Reads and writes aliases in the configuration file
#[derive(Debug, Clone)]
pub struct AliasManager {
    config: ConfigManager,
}

impl AliasManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: ConfigManager::new()?,
        })
    }

    pub fn with_config(config: ConfigManager) -> Self {
        Self { config }
    }

    pub fn list(&self) -> Result<Vec<Alias>> {
        let mut aliases = self.config.load()?.aliases;
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        self.config
            .load()?
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// Add an alias, replacing any existing alias with the same name
    pub fn set(&self, alias: Alias) -> Result<()> {
        alias.validate()?;
        let mut config = self.config.load()?;
        config.aliases.retain(|a| a.name != alias.name);
        config.aliases.push(alias);
        self.config.save(&config)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config.load()?;
        let before = config.aliases.len();
        config.aliases.retain(|a| a.name != name);
        if config.aliases.len() == before {
            return Err(Error::AliasNotFound(name.to_string()));
        }
        self.config.save(&config)
    }
}
