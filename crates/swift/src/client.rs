//! Swift HTTP backend
//!
//! Wraps reqwest and implements the Backend trait from st-core. Every HTTP
//! status comes back as a response; only transport failures are errors.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use st_core::{
    Backend, Body, ByteStream, Endpoint, Error, Headers, Method, Request, Response, Result,
};

/// Header carrying the auth token on storage requests
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// User agent sent on storage and auth requests
pub const USER_AGENT: &str = concat!("stratus/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`HttpBackend`]
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    /// Per-read timeout; a stalled transfer fails after this long without data
    pub read_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Storage-proxy client speaking the Swift object API over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    inner: reqwest::Client,
}

impl HttpBackend {
    pub fn new(options: HttpOptions) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .build()
            .map_err(|e| Error::General(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { inner })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}

/// Absolute URL for `request` against the storage URL
pub fn request_url(storage_url: &str, request: &Request) -> Result<url::Url> {
    let path = request.path_and_query();
    let joined = format!(
        "{}/{}",
        storage_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url::Url::parse(&joined)
        .map_err(|e| Error::Config(format!("invalid storage URL '{storage_url}': {e}")))
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Head => reqwest::Method::HEAD,
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Classify a reqwest failure
pub(crate) fn transport_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::General(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        Error::Network(format!("timed out: {e}"))
    } else {
        Error::Network(e.to_string())
    }
}

/// Response headers as a map with lower-cased names
pub(crate) fn collect_headers(headers: &http::HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, endpoint: &Endpoint, request: Request) -> Result<Response> {
        let url = request_url(&endpoint.storage_url, &request)?;
        tracing::debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .inner
            .request(http_method(request.method), url)
            .header(AUTH_TOKEN_HEADER, &endpoint.auth_token);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // A caller-supplied Content-Length is sent as is.
        let length = if request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-length"))
        {
            None
        } else {
            request.body.content_length()
        };
        builder = match request.body {
            Body::Empty if request.method == Method::Put && length.is_some() => {
                builder.header("content-length", "0")
            }
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes),
            body => {
                if let Some(length) = length {
                    builder = builder.header("content-length", length.to_string());
                }
                builder.body(reqwest::Body::wrap_stream(body.into_stream().await?))
            }
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        tracing::debug!(status, "Received response");

        let headers = collect_headers(response.headers());
        let body = ByteStream::new(response.bytes_stream().map_err(transport_error));
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_joins_storage_url() {
        let request = Request::new(Method::Get, "/c/a%20b").query("format", "json");
        let url = request_url("http://127.0.0.1:8080/v1/AUTH_test/", &request).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8080/v1/AUTH_test/c/a%20b?format=json"
        );

        let request = Request::new(Method::Head, "c/o");
        let url = request_url("http://127.0.0.1:8080/v1/AUTH_test", &request).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/v1/AUTH_test/c/o");
    }

    #[test]
    fn test_request_url_rejects_garbage() {
        let request = Request::new(Method::Head, "/c/o");
        assert!(matches!(
            request_url("not a url", &request),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_collect_headers_lowercases_names() {
        let mut map = http::HeaderMap::new();
        map.insert(
            http::HeaderName::from_bytes(b"ETag").unwrap(),
            http::HeaderValue::from_static("\"abc\""),
        );
        map.insert(
            http::HeaderName::from_bytes(b"X-Object-Manifest").unwrap(),
            http::HeaderValue::from_static("c_segments/o/"),
        );
        let headers = collect_headers(&map);
        assert_eq!(headers.get("etag").map(String::as_str), Some("\"abc\""));
        assert!(headers.contains_key("x-object-manifest"));
    }

    #[test]
    fn test_http_method_mapping() {
        assert_eq!(http_method(Method::Head), reqwest::Method::HEAD);
        assert_eq!(http_method(Method::Delete), reqwest::Method::DELETE);
    }

    #[test]
    fn test_backend_builds() {
        assert!(HttpBackend::new(HttpOptions::default()).is_ok());
    }
}
