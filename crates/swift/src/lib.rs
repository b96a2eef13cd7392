//! st-swift: Swift HTTP adapter for stratus
//!
//! Provides the reqwest-backed [`HttpBackend`] and the v1/v2
//! [`SwiftAuthenticator`], and wires an [`Alias`] into a ready
//! [`Orchestrator`].

pub mod auth;
pub mod client;

use std::path::PathBuf;
use std::sync::Arc;

use st_core::{
    Alias, AuthCacheFile, Authenticator, ConcurrencyGate, Orchestrator, Result, RetryConfig,
    StaticAuthenticator, TokenCache,
};

pub use auth::{AuthMethod, AuthSettings, SwiftAuthenticator};
pub use client::{HttpBackend, HttpOptions};

/// Per-invocation settings layered over an alias
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Process-wide bound on simultaneous requests
    pub concurrency: usize,
    /// Overrides the alias retry count; total attempts are `retries + 1`
    pub retries: Option<u32>,
    pub cache_auth: bool,
    /// Token cache location; defaults to `<tmp>/<user>.stratus`
    pub auth_cache_path: Option<PathBuf>,
    pub http: HttpOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retries: None,
            cache_auth: false,
            auth_cache_path: None,
            http: HttpOptions::default(),
        }
    }
}

impl ClientOptions {
    /// The alias retry settings with any override applied
    pub fn retry_config(&self, alias: &Alias) -> RetryConfig {
        let mut config = alias.retry_config();
        if let Some(retries) = self.retries {
            config.max_attempts = retries.saturating_add(1);
        }
        config
    }
}

/// Authenticator for an alias: a fixed endpoint when one is configured
pub fn authenticator_for(alias: &Alias, retry: RetryConfig) -> Result<Arc<dyn Authenticator>> {
    alias.validate()?;
    if let (Some(storage_url), Some(auth_token)) = (&alias.storage_url, &alias.auth_token) {
        return Ok(Arc::new(StaticAuthenticator::new(storage_url, auth_token)));
    }
    Ok(Arc::new(SwiftAuthenticator::new(
        AuthSettings::from(alias),
        retry,
    )?))
}

/// Token cache for an alias, backed by the on-disk cache when enabled
pub fn token_cache(alias: &Alias, options: &ClientOptions) -> Result<Arc<TokenCache>> {
    let authenticator = authenticator_for(alias, options.retry_config(alias))?;
    let mut tokens = TokenCache::new(authenticator);
    if options.cache_auth && !alias.is_preauthenticated() {
        let path = options
            .auth_cache_path
            .clone()
            .unwrap_or_else(AuthCacheFile::default_path);
        let fingerprint = AuthSettings::from(alias).fingerprint();
        tokens = tokens.with_disk_cache(AuthCacheFile::new(path, fingerprint));
    }
    Ok(Arc::new(tokens))
}

/// Orchestrator talking to the cluster named by `alias`
pub fn connect(alias: &Alias, options: &ClientOptions) -> Result<Orchestrator> {
    let tokens = token_cache(alias, options)?;
    let backend = Arc::new(HttpBackend::new(options.http.clone())?);
    tracing::debug!(
        alias = %alias.name,
        concurrency = options.concurrency,
        "Connecting"
    );
    Ok(Orchestrator::new(
        backend,
        tokens,
        options.retry_config(alias),
        ConcurrencyGate::new(options.concurrency),
    ))
}
