//! Command implementations
//!
//! Each command returns an [`ExitCode`]; errors are reported through the
//! [`Formatter`] before returning.

pub mod alias;
pub mod auth;
pub mod completions;
pub mod delete;
pub mod get;
pub mod head;
pub mod put;

use st_core::{
    Alias, AliasManager, Config, ConfigManager, Error, ObjectPath, Orchestrator, RemotePath,
    parse_path,
};
use st_swift::ClientOptions;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Connection settings from the global flags
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub concurrency: Option<usize>,
    pub retries: Option<u32>,
    pub cache_auth: bool,
    pub auth_url: Option<String>,
    pub auth_user: Option<String>,
    pub auth_key: Option<String>,
}

impl GlobalOptions {
    /// Client options, falling back to the configured defaults
    pub fn client_options(&self, config: &Config) -> ClientOptions {
        ClientOptions {
            concurrency: self
                .concurrency
                .unwrap_or(config.defaults.concurrency)
                .max(1),
            retries: self.retries,
            cache_auth: self.cache_auth || config.defaults.cache_auth,
            ..Default::default()
        }
    }

    /// Apply credential overrides to an alias, or build one from them alone
    pub fn resolve_alias(&self, name: &str, stored: Option<Alias>) -> Option<Alias> {
        let mut alias = match stored {
            Some(alias) => alias,
            None => {
                let url = self.auth_url.as_ref()?;
                Alias::new(name, url, "", "")
            }
        };
        if let Some(url) = &self.auth_url {
            alias.auth_url = url.clone();
        }
        if let Some(user) = &self.auth_user {
            alias.auth_user = user.clone();
        }
        if let Some(key) = &self.auth_key {
            alias.auth_key = key.clone();
        }
        Some(alias)
    }
}

/// Print `error` and map it to an exit code
pub fn report(formatter: &Formatter, context: &str, error: &Error) -> ExitCode {
    formatter.error(&format!("{context}: {error}"));
    ExitCode::from_error(error)
}

/// Load the configuration file
pub fn load_config(formatter: &Formatter) -> Result<Config, ExitCode> {
    ConfigManager::new()
        .and_then(|m| m.load())
        .map_err(|e| report(formatter, "Failed to load configuration", &e))
}

/// Look up an alias, honouring credential overrides
pub fn lookup_alias(
    name: &str,
    global: &GlobalOptions,
    formatter: &Formatter,
) -> Result<Alias, ExitCode> {
    let manager = AliasManager::new()
        .map_err(|e| report(formatter, "Failed to load aliases", &e))?;
    let stored = match manager.get(name) {
        Ok(alias) => Some(alias),
        Err(Error::AliasNotFound(_)) => None,
        Err(e) => return Err(report(formatter, "Failed to get alias", &e)),
    };
    global.resolve_alias(name, stored).ok_or_else(|| {
        formatter.error(&format!("Alias '{name}' not found"));
        ExitCode::NotFound
    })
}

/// Orchestrator for the cluster an alias names
pub fn connect(
    alias_name: &str,
    global: &GlobalOptions,
    formatter: &Formatter,
) -> Result<Orchestrator, ExitCode> {
    let config = load_config(formatter)?;
    let alias = lookup_alias(alias_name, global, formatter)?;
    tracing::debug!(alias = %alias.name, auth_url = %alias.auth_url, "Resolved alias");
    st_swift::connect(&alias, &global.client_options(&config))
        .map_err(|e| report(formatter, "Failed to create client", &e))
}

/// Parse `alias/container/object`
pub fn parse_object_path(
    path: &str,
    formatter: &Formatter,
) -> Result<(RemotePath, ObjectPath), ExitCode> {
    let remote = parse_path(path).map_err(|e| report(formatter, "Invalid path", &e))?;
    let object = remote
        .object_path()
        .map_err(|e| report(formatter, "Invalid path", &e))?;
    Ok((remote, object))
}

/// Parse `alias/container[/prefix]`, requiring at least a container
pub fn parse_container_path(path: &str, formatter: &Formatter) -> Result<RemotePath, ExitCode> {
    let remote = parse_path(path).map_err(|e| report(formatter, "Invalid path", &e))?;
    if remote.container.is_empty() {
        let e = Error::InvalidPath(format!("'{remote}' does not name a container"));
        return Err(report(formatter, "Invalid path", &e));
    }
    Ok(remote)
}
