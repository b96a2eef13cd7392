//! Capabilities the engine consumes, and the wire types they exchange
//!
//! The engine never talks HTTP itself. Everything goes through a [`Backend`],
//! which may be the proxy-facing HTTP client or a direct ring client, and
//! tokens come from an [`Authenticator`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::body::{Body, ByteStream};
use crate::error::{Error, Result};
use crate::manifest::ManifestKind;
use crate::path::quote;
use crate::token::Endpoint;

/// Header map with lower-cased names
pub type Headers = BTreeMap<String, String>;

/// Header naming the prefix of a dynamic large object
pub const OBJECT_MANIFEST_HEADER: &str = "x-object-manifest";

/// Header set on static large object manifests
pub const STATIC_LARGE_OBJECT_HEADER: &str = "x-static-large-object";

/// Local modification time recorded on uploaded objects
pub const MTIME_HEADER: &str = "x-object-meta-mtime";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request against the storage service
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path relative to the storage URL, already percent-encoded
    pub path: String,
    pub headers: Headers,
    /// Query parameters; an empty value is sent as a bare key
    pub query: BTreeMap<String, String>,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            query: BTreeMap::new(),
            body: Body::Empty,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn headers(mut self, headers: &Headers) -> Self {
        for (k, v) in headers {
            self.headers.insert(k.to_ascii_lowercase(), v.clone());
        }
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Path plus encoded, sorted query string
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    quote(k)
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.path)
    }
}

/// Response to one request
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: ByteStream,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ByteStream::empty(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// ETag without surrounding quotes
    pub fn etag(&self) -> Option<String> {
        self.header("etag").map(|e| e.trim_matches('"').to_string())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into its classified error
    pub fn error_for_status(self, path: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status;
        let path = path.to_string();
        Err(match status {
            401 | 403 => Error::AuthExpired { status, path },
            404 => Error::NotFound(path),
            500..=599 => Error::Server { status, path },
            _ => Error::Client { status, path },
        })
    }
}

/// The `do_request` capability: one round trip to the storage service
///
/// Implementations return `Ok` for every HTTP status and reserve `Err` for
/// transport failures, which should be reported as [`Error::Network`].
#[async_trait]
pub trait Backend: Send + Sync {
    async fn send(&self, endpoint: &Endpoint, request: Request) -> Result<Response>;
}

/// Obtains a storage endpoint and token
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate from scratch; fails with [`Error::Auth`] when credentials are rejected
    async fn authenticate(&self) -> Result<Endpoint>;
}

/// Metadata about a stored object, as returned by HEAD
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub path: String,
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Local modification time recorded at upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestKind>,
    /// Prefix named by a dynamic manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_prefix: Option<String>,
    pub headers: Headers,
}

impl ObjectInfo {
    pub fn from_headers(path: impl Into<String>, headers: Headers) -> Self {
        let get = |name: &str| headers.get(name).cloned();
        let manifest_prefix = get(OBJECT_MANIFEST_HEADER);
        let is_static = headers
            .get(STATIC_LARGE_OBJECT_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let manifest = if is_static {
            Some(ManifestKind::Static)
        } else if manifest_prefix.is_some() {
            Some(ManifestKind::Dynamic)
        } else {
            None
        };

        Self {
            path: path.into(),
            size_bytes: get("content-length").and_then(|v| v.parse().ok()),
            etag: get("etag").map(|e| e.trim_matches('"').to_string()),
            content_type: get("content-type"),
            last_modified: get("last-modified"),
            mtime: get(MTIME_HEADER).and_then(|v| v.parse().ok()),
            manifest,
            manifest_prefix,
            headers,
        }
    }
}
