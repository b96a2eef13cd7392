//! Swift token acquisition
//!
//! Tries auth v1 and the three v2 credential forms in turn until one yields
//! a storage URL and token. A URL containing `1.0` puts v1 first; otherwise
//! it is the last resort.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use st_core::path::quote;
use st_core::{
    Alias, AuthCacheFile, Authenticator, Endpoint, Error, ErrorKind, Result, RetryConfig,
    retry_with_backoff,
};

use crate::client::{USER_AGENT, collect_headers, transport_error};

const API_KEY_CREDENTIALS: &str = "RAX-KSKEY:apiKeyCredentials";
const PASSWORD_CREDENTIALS: &str = "passwordCredentials";
const OBJECT_STORE: &str = "object-store";

/// Everything that determines which endpoint authentication returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub auth_url: String,
    pub user: String,
    pub key: String,
    pub tenant: Option<String>,
    pub region: Option<String>,
    /// Prefer internal endpoints
    pub snet: bool,
}

impl AuthSettings {
    /// Digest keying the on-disk token cache
    pub fn fingerprint(&self) -> String {
        AuthCacheFile::fingerprint(&[
            &self.auth_url,
            &self.user,
            &self.key,
            self.tenant.as_deref().unwrap_or(""),
            self.region.as_deref().unwrap_or(""),
            if self.snet { "snet" } else { "" },
        ])
    }
}

impl From<&Alias> for AuthSettings {
    fn from(alias: &Alias) -> Self {
        Self {
            auth_url: alias.auth_url.clone(),
            user: alias.auth_user.clone(),
            key: alias.auth_key.clone(),
            tenant: alias.auth_tenant.clone(),
            region: alias.region.clone(),
            snet: alias.snet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    V1,
    V2Key,
    V2Password,
    /// Password credentials with the tenant set to the user name
    V2PasswordForceTenant,
}

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::V1 => "v1",
            AuthMethod::V2Key => "v2 api key",
            AuthMethod::V2Password => "v2 password",
            AuthMethod::V2PasswordForceTenant => "v2 password (tenant forced)",
        }
    }
}

/// Methods to try, in order
pub fn method_order(settings: &AuthSettings) -> Vec<AuthMethod> {
    let mut v2 = vec![AuthMethod::V2Key, AuthMethod::V2Password];
    if settings.tenant.is_none() {
        v2.push(AuthMethod::V2PasswordForceTenant);
    }
    if settings.auth_url.contains("1.0") {
        std::iter::once(AuthMethod::V1).chain(v2).collect()
    } else {
        v2.push(AuthMethod::V1);
        v2
    }
}

/// JSON body of a v2 token request
pub fn v2_request_body(
    settings: &AuthSettings,
    credential_type: &str,
    force_tenant: bool,
) -> serde_json::Value {
    let secret = if credential_type == API_KEY_CREDENTIALS {
        "apiKey"
    } else {
        "password"
    };
    let mut body = json!({
        "auth": {
            credential_type: {
                "username": settings.user,
                secret: settings.key,
            }
        }
    });
    if let Some(tenant) = settings.tenant.as_ref().or(force_tenant.then_some(&settings.user)) {
        body["auth"]["tenantName"] = json!(tenant);
    }
    body
}

/// Storage URL with `snet-` prepended to the host
pub fn snet_url(storage_url: &str) -> Result<String> {
    let mut url = url::Url::parse(storage_url)
        .map_err(|e| Error::Auth(format!("invalid storage URL '{storage_url}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Auth(format!("storage URL '{storage_url}' has no host")))?
        .to_string();
    url.set_host(Some(&format!("snet-{host}")))
        .map_err(|e| Error::Auth(format!("invalid storage host: {e}")))?;
    Ok(url.to_string())
}

#[derive(Debug, Deserialize)]
pub struct V2Response {
    pub access: Access,
}

#[derive(Debug, Deserialize)]
pub struct Access {
    pub token: Token,
    #[serde(rename = "serviceCatalog", default)]
    pub service_catalog: Vec<Service>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct User {
    #[serde(rename = "RAX-AUTH:defaultRegion")]
    pub default_region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
pub struct CatalogEndpoint {
    pub region: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: Option<String>,
    #[serde(rename = "internalURL")]
    pub internal_url: Option<String>,
}

impl CatalogEndpoint {
    fn url(&self, snet: bool) -> Option<String> {
        if snet {
            self.internal_url.clone()
        } else {
            self.public_url.clone()
        }
    }
}

/// Pick the object-store URL from a v2 service catalog
///
/// Preference: exact region match, case-insensitive match, an endpoint with
/// no region, then (only when no region is wanted) any endpoint. The region
/// defaults to the user's default region.
pub fn select_storage_url(access: &Access, region: Option<&str>, snet: bool) -> Result<String> {
    let region = region
        .map(str::to_string)
        .or_else(|| access.user.as_ref().and_then(|u| u.default_region.clone()))
        .unwrap_or_default();

    let mut regions = Vec::new();
    let (mut exact, mut folded, mut regionless, mut any) = (None, None, None, None);
    for endpoint in access
        .service_catalog
        .iter()
        .filter(|s| s.kind == OBJECT_STORE)
        .flat_map(|s| &s.endpoints)
    {
        match &endpoint.region {
            Some(r) => {
                regions.push(r.clone());
                if *r == region {
                    exact = endpoint.url(snet);
                } else if r.eq_ignore_ascii_case(&region) {
                    folded = endpoint.url(snet);
                } else if region.is_empty() && any.is_none() {
                    any = endpoint.url(snet);
                }
            }
            None if regionless.is_none() => regionless = endpoint.url(snet),
            None => {}
        }
    }

    exact.or(folded).or(regionless).or(any).ok_or_else(|| {
        Error::Auth(format!(
            "no storage URL for region '{region}' ({}); available regions: {}",
            if snet { "internalURL" } else { "publicURL" },
            regions.join(" ")
        ))
    })
}

/// Authenticator speaking Swift auth v1 and Keystone-style v2
pub struct SwiftAuthenticator {
    http: reqwest::Client,
    settings: AuthSettings,
    retry: RetryConfig,
}

impl SwiftAuthenticator {
    pub fn new(settings: AuthSettings, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::General(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            settings,
            retry,
        })
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    async fn try_method(&self, method: AuthMethod) -> Result<Endpoint> {
        tracing::debug!(method = method.label(), url = %self.settings.auth_url, "Attempting auth");
        let this = self;
        retry_with_backoff(
            &self.retry,
            move || async move {
                match method {
                    AuthMethod::V1 => this.auth_v1().await,
                    AuthMethod::V2Key => this.auth_v2(API_KEY_CREDENTIALS, false).await,
                    AuthMethod::V2Password => this.auth_v2(PASSWORD_CREDENTIALS, false).await,
                    AuthMethod::V2PasswordForceTenant => {
                        this.auth_v2(PASSWORD_CREDENTIALS, true).await
                    }
                }
            },
            |e| matches!(e.kind(), ErrorKind::TransientNetwork | ErrorKind::Server),
        )
        .await
    }

    fn status_error(&self, status: u16) -> Error {
        let path = self.settings.auth_url.clone();
        match status {
            500..=599 => Error::Server { status, path },
            _ => Error::Client { status, path },
        }
    }

    async fn auth_v1(&self) -> Result<Endpoint> {
        let response = self
            .http
            .get(&self.settings.auth_url)
            .header("x-auth-user", quote(&self.settings.user))
            .header("x-auth-key", quote(&self.settings.key))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(self.status_error(status));
        }

        let headers = collect_headers(response.headers());
        let storage_url = headers
            .get("x-storage-url")
            .ok_or_else(|| Error::Auth("no x-storage-url header in response".into()))?;
        let storage_url = if self.settings.snet {
            snet_url(storage_url)?
        } else {
            storage_url.clone()
        };
        let token = headers
            .get("x-auth-token")
            .or_else(|| headers.get("x-storage-token"))
            .ok_or_else(|| {
                Error::Auth("no x-auth-token or x-storage-token header in response".into())
            })?;
        Ok(Endpoint::new(storage_url, token.clone()))
    }

    async fn auth_v2(&self, credential_type: &str, force_tenant: bool) -> Result<Endpoint> {
        let url = format!("{}/tokens", self.settings.auth_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&v2_request_body(&self.settings, credential_type, force_tenant))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(self.status_error(status));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        let parsed: V2Response = serde_json::from_slice(&body)
            .map_err(|e| Error::Auth(format!("unreadable v2 auth response: {e}")))?;
        let storage_url = select_storage_url(
            &parsed.access,
            self.settings.region.as_deref(),
            self.settings.snet,
        )?;
        Ok(Endpoint::new(storage_url, parsed.access.token.id))
    }
}

#[async_trait]
impl Authenticator for SwiftAuthenticator {
    async fn authenticate(&self) -> Result<Endpoint> {
        if self.settings.auth_url.is_empty() {
            return Err(Error::Config("no auth URL has been provided".into()));
        }
        let mut failures = Vec::new();
        for method in method_order(&self.settings) {
            match self.try_method(method).await {
                Ok(endpoint) => {
                    tracing::debug!(
                        method = method.label(),
                        storage_url = %endpoint.storage_url,
                        "Authenticated"
                    );
                    return Ok(endpoint);
                }
                Err(e) => {
                    tracing::debug!(method = method.label(), error = %e, "Auth method failed");
                    failures.push(format!("{}: {e}", method.label()));
                }
            }
        }
        Err(Error::Auth(failures.join("; ")))
    }
}
