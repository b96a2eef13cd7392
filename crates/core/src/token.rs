//! Auth token lifecycle
//!
//! [`TokenCache`] owns the storage endpoint and token for one client
//! session. Refreshes are single-flight: callers that arrive while a refresh
//! is running wait for it and share its result instead of authenticating
//! again. The endpoint is swapped wholesale and never mutated in place.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::traits::Authenticator;

/// Storage URL plus the token that authorises requests against it
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub storage_url: String,
    pub auth_token: String,
    /// Cleared when a consumer observes the token being refused
    pub valid: bool,
}

impl Endpoint {
    pub fn new(storage_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            storage_url: storage_url.into(),
            auth_token: auth_token.into(),
            valid: true,
        }
    }

    /// Token with everything but a short prefix hidden, for display
    pub fn masked_token(&self) -> String {
        let visible: String = self.auth_token.chars().take(6).collect();
        format!("{visible}…")
    }

    fn stale(&self) -> Self {
        Self {
            valid: false,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("storage_url", &self.storage_url)
            .field("auth_token", &self.masked_token())
            .field("valid", &self.valid)
            .finish()
    }
}

/// Session-scoped endpoint cache with single-flight refresh
pub struct TokenCache {
    authenticator: Arc<dyn Authenticator>,
    current: RwLock<Option<Arc<Endpoint>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    disk: Option<AuthCacheFile>,
}

impl TokenCache {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            current: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            disk: None,
        }
    }

    /// Seed from, and persist to, an on-disk cache
    pub fn with_disk_cache(mut self, cache: AuthCacheFile) -> Self {
        if let Some(endpoint) = cache.load() {
            self.store(endpoint);
        }
        self.disk = Some(cache);
        self
    }

    /// The current endpoint, authenticating first when there is none or it is stale
    pub async fn current(&self) -> Result<Endpoint> {
        if let Some(endpoint) = self.snapshot().filter(|e| e.valid) {
            return Ok(endpoint);
        }
        let seen = self.generation.load(Ordering::Acquire);
        self.refresh_from(seen, true).await
    }

    /// Authenticate again, unless a refresh completed while this call waited
    pub async fn refresh(&self) -> Result<Endpoint> {
        let seen = self.generation.load(Ordering::Acquire);
        self.refresh_from(seen, false).await
    }

    /// Mark the current endpoint stale so the next `current()` refreshes
    pub fn invalidate(&self) {
        self.swap_stale(|_| true);
    }

    /// Invalidate only if `refused` is still the current token
    ///
    /// A request that failed with a token which has since been replaced must
    /// not throw away the replacement.
    pub fn invalidate_token(&self, refused: &Endpoint) {
        if self.swap_stale(|e| e.valid && e.auth_token == refused.auth_token) {
            tracing::debug!("Invalidated refused auth token");
        }
    }

    fn swap_stale(&self, should: impl Fn(&Endpoint) -> bool) -> bool {
        let Ok(mut guard) = self.current.write() else {
            return false;
        };
        let stale = guard
            .as_deref()
            .filter(|e| should(e))
            .map(Endpoint::stale);
        match stale {
            Some(stale) => {
                *guard = Some(Arc::new(stale));
                true
            }
            None => false,
        }
    }

    /// Number of successful authentications performed by this cache
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn refresh_from(&self, seen: u64, accept_valid: bool) -> Result<Endpoint> {
        let _guard = self.refresh_lock.lock().await;

        let refreshed_meanwhile = self.generation.load(Ordering::Acquire) != seen;
        if (accept_valid || refreshed_meanwhile)
            && let Some(endpoint) = self.snapshot().filter(|e| e.valid)
        {
            return Ok(endpoint);
        }

        tracing::debug!("Authenticating");
        let endpoint = self.authenticator.authenticate().await?;
        self.store(endpoint.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(disk) = &self.disk {
            disk.save(&endpoint);
        }
        Ok(endpoint)
    }

    fn snapshot(&self) -> Option<Endpoint> {
        self.current
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|e| (**e).clone()))
    }

    fn store(&self, endpoint: Endpoint) {
        if let Ok(mut guard) = self.current.write() {
            *guard = Some(Arc::new(endpoint));
        }
    }
}

/// Authenticator for a storage URL and token issued out of band
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    endpoint: Endpoint,
}

impl StaticAuthenticator {
    pub fn new(storage_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(storage_url, auth_token),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self) -> Result<Endpoint> {
        Ok(self.endpoint.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct CachedAuth {
    fingerprint: String,
    storage_url: String,
    auth_token: String,
}

/// Best-effort on-disk copy of the last endpoint
///
/// Entries are keyed by a fingerprint of the credentials that produced them;
/// an entry written for different settings is ignored.
#[derive(Debug, Clone)]
pub struct AuthCacheFile {
    path: PathBuf,
    fingerprint: String,
}

impl AuthCacheFile {
    pub fn new(path: impl Into<PathBuf>, fingerprint: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// `<tmp>/<user>.stratus`
    pub fn default_path() -> PathBuf {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "stratus".to_string());
        std::env::temp_dir().join(format!("{user}.stratus"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 over the settings that determine which endpoint auth returns
    pub fn fingerprint(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn load(&self) -> Option<Endpoint> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "No cached auth");
                return None;
            }
        };
        match serde_json::from_str::<CachedAuth>(&text) {
            Ok(cached) if cached.fingerprint == self.fingerprint => {
                tracing::debug!(path = %self.path.display(), "Using cached auth");
                Some(Endpoint::new(cached.storage_url, cached.auth_token))
            }
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "Cached auth is for other settings; discarding");
                None
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Unrecognized auth cache");
                None
            }
        }
    }

    pub fn save(&self, endpoint: &Endpoint) {
        if let Err(e) = self.try_save(endpoint) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write auth cache");
        }
    }

    fn try_save(&self, endpoint: &Endpoint) -> Result<()> {
        let cached = CachedAuth {
            fingerprint: self.fingerprint.clone(),
            storage_url: endpoint.storage_url.clone(),
            auth_token: endpoint.auth_token.clone(),
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&cached)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
