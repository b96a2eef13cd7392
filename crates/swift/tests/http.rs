//! Auth and backend behaviour against a scripted local HTTP server

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use st_core::{
    Authenticator, Backend, Body, Endpoint, Error, Method, Request, RetryBuilder, StreamSource,
};
use st_swift::{AuthSettings, HttpBackend, HttpOptions, SwiftAuthenticator};

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn header_count(&self, name: &str) -> usize {
        self.headers.iter().filter(|(k, _)| k == name).count()
    }
}

type Reply = (u16, Vec<(String, String)>, String);

struct Server {
    base: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Server {
    fn requests(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Seen> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let chunked = headers
        .iter()
        .any(|(k, v)| k == "transfer-encoding" && v.eq_ignore_ascii_case("chunked"));
    let body = if chunked {
        while !buf[head_end..].ends_with(b"0\r\n\r\n") {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        decode_chunked(&buf[head_end..])
    } else {
        let length: usize = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        buf[head_end..].to_vec()
    };
    let body = String::from_utf8_lossy(&body).to_string();
    Some(Seen {
        method,
        path,
        headers,
        body,
    })
}

fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(line_end) = raw.windows(2).position(|w| w == b"\r\n") {
        let size = std::str::from_utf8(&raw[..line_end])
            .ok()
            .and_then(|l| usize::from_str_radix(l.split(';').next().unwrap_or("").trim(), 16).ok())
            .unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        body.extend_from_slice(&raw[start..start + size]);
        raw = &raw[start + size + 2..];
    }
    body
}

async fn serve<F>(handler: F) -> Server
where
    F: Fn(&Seen, usize) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let n = {
                    let mut log = log.lock().unwrap();
                    log.push(request.clone());
                    log.len()
                };
                let (status, headers, body) = handler(&request, n);
                let mut response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: {}\r\nconnection: close\r\n",
                    body.len()
                );
                for (k, v) in headers {
                    response.push_str(&format!("{k}: {v}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(&body);
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Server { base, seen }
}

fn settings(auth_url: String) -> AuthSettings {
    AuthSettings {
        auth_url,
        user: "tester".into(),
        key: "testing".into(),
        tenant: None,
        region: None,
        snet: false,
    }
}

fn fast_retry() -> st_core::RetryConfig {
    RetryBuilder::new()
        .max_attempts(3)
        .initial_backoff_ms(1)
        .max_backoff_ms(2)
        .build()
}

fn v1_ok() -> Reply {
    (
        200,
        vec![
            (
                "x-storage-url".into(),
                "http://storage.example:8080/v1/AUTH_test".into(),
            ),
            ("x-auth-token".into(), "AUTH_tk1".into()),
        ],
        String::new(),
    )
}

#[tokio::test]
async fn test_v1_auth_reads_storage_url_and_token() {
    let server = serve(|_, _| v1_ok()).await;
    let auth = SwiftAuthenticator::new(
        settings(format!("{}/auth/v1.0", server.base)),
        fast_retry(),
    )
    .unwrap();

    let endpoint = auth.authenticate().await.unwrap();
    assert_eq!(endpoint.storage_url, "http://storage.example:8080/v1/AUTH_test");
    assert_eq!(endpoint.auth_token, "AUTH_tk1");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/auth/v1.0");
    assert_eq!(requests[0].header("x-auth-user"), Some("tester"));
    assert_eq!(requests[0].header("x-auth-key"), Some("testing"));
}

#[tokio::test]
async fn test_v1_snet_prefixes_storage_host() {
    let server = serve(|_, _| v1_ok()).await;
    let mut s = settings(format!("{}/auth/v1.0", server.base));
    s.snet = true;
    let auth = SwiftAuthenticator::new(s, fast_retry()).unwrap();

    let endpoint = auth.authenticate().await.unwrap();
    assert_eq!(
        endpoint.storage_url,
        "http://snet-storage.example:8080/v1/AUTH_test"
    );
}

#[tokio::test]
async fn test_v2_falls_back_to_password_credentials() {
    let server = serve(|req, _| {
        if req.body.contains("apiKeyCredentials") {
            return (401, vec![], String::new());
        }
        let body = serde_json::json!({
            "access": {
                "token": {"id": "v2token"},
                "serviceCatalog": [
                    {"type": "object-store", "endpoints": [
                        {"region": "ORD", "publicURL": "https://ord.example/v1/AUTH_a"},
                    ]},
                ],
            }
        });
        (
            200,
            vec![("content-type".into(), "application/json".into())],
            body.to_string(),
        )
    })
    .await;
    let auth = SwiftAuthenticator::new(
        settings(format!("{}/v2.0", server.base)),
        fast_retry(),
    )
    .unwrap();

    let endpoint = auth.authenticate().await.unwrap();
    assert_eq!(endpoint.storage_url, "https://ord.example/v1/AUTH_a");
    assert_eq!(endpoint.auth_token, "v2token");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.method == "POST" && r.path == "/v2.0/tokens"));
    assert!(requests[1].body.contains("passwordCredentials"));
}

#[tokio::test]
async fn test_rejected_everywhere_is_auth_error() {
    let server = serve(|_, _| (401, vec![], String::new())).await;
    let auth = SwiftAuthenticator::new(
        settings(format!("{}/auth/v1.0", server.base)),
        fast_retry(),
    )
    .unwrap();

    let err = auth.authenticate().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    // v1, api key, password, password with forced tenant; no retries on 401
    assert_eq!(server.requests().len(), 4);
}

#[tokio::test]
async fn test_auth_server_errors_are_retried() {
    let server = serve(|_, n| {
        if n == 1 {
            (503, vec![], String::new())
        } else {
            v1_ok()
        }
    })
    .await;
    let auth = SwiftAuthenticator::new(
        settings(format!("{}/auth/v1.0", server.base)),
        fast_retry(),
    )
    .unwrap();

    let endpoint = auth.authenticate().await.unwrap();
    assert_eq!(endpoint.auth_token, "AUTH_tk1");
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_backend_sends_token_and_returns_every_status() {
    let server = serve(|req, _| match req.path.as_str() {
        "/v1/AUTH_test/c/o" => (
            200,
            vec![("etag".into(), "\"abc\"".into())],
            "hello".into(),
        ),
        _ => (404, vec![], String::new()),
    })
    .await;
    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let endpoint = Endpoint::new(format!("{}/v1/AUTH_test", server.base), "AUTH_tk1");

    let response = backend
        .send(&endpoint, Request::new(Method::Get, "/c/o"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.etag().as_deref(), Some("abc"));
    assert_eq!(&response.body.collect().await.unwrap()[..], b"hello");

    let missing = backend
        .send(&endpoint, Request::new(Method::Head, "/c/missing"))
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
    assert!(matches!(
        missing.error_for_status("c/missing"),
        Err(Error::NotFound(_))
    ));

    let requests = server.requests();
    assert_eq!(requests[0].header("x-auth-token"), Some("AUTH_tk1"));
}

#[tokio::test]
async fn test_backend_put_sends_body() {
    let server = serve(|_, _| (201, vec![], String::new())).await;
    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let endpoint = Endpoint::new(format!("{}/v1/AUTH_test", server.base), "AUTH_tk1");

    let request = Request::new(Method::Put, "/c/o")
        .header("content-type", "text/plain")
        .body(bytes::Bytes::from_static(b"payload"));
    let response = backend.send(&endpoint, request).await.unwrap();
    assert_eq!(response.status, 201);

    let requests = server.requests();
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].body, "payload");
    assert_eq!(requests[0].header("content-type"), Some("text/plain"));
}

fn put_server_endpoint(server: &Server) -> Endpoint {
    Endpoint::new(format!("{}/v1/AUTH_test", server.base), "AUTH_tk1")
}

#[tokio::test]
async fn test_file_range_put_sends_one_content_length() {
    let server = serve(|_, _| (201, vec![], String::new())).await;
    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), b"0123456789").unwrap();

    let body = Body::File {
        path: file.path().to_path_buf(),
        offset: 2,
        length: 4,
    };
    // Segment uploads set the header themselves.
    let with_header = Request::new(Method::Put, "/c_segments/o/1")
        .header("content-length", "4")
        .body(body.clone());
    let without_header = Request::new(Method::Put, "/c_segments/o/2").body(body);
    let endpoint = put_server_endpoint(&server);
    for request in [with_header, without_header] {
        let response = backend.send(&endpoint, request).await.unwrap();
        assert_eq!(response.status, 201);
    }

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    for seen in &requests {
        assert_eq!(seen.header_count("content-length"), 1, "{}", seen.path);
        assert_eq!(seen.header("content-length"), Some("4"));
        assert_eq!(seen.header("transfer-encoding"), None);
        assert_eq!(seen.body, "2345");
    }
}

#[tokio::test]
async fn test_empty_put_sends_zero_length() {
    let server = serve(|_, _| (201, vec![], String::new())).await;
    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let endpoint = put_server_endpoint(&server);

    let manifest = Request::new(Method::Put, "/c/o")
        .header("x-object-manifest", "c_segments/o/")
        .header("content-length", "0");
    backend.send(&endpoint, manifest).await.unwrap();
    backend
        .send(&endpoint, Request::new(Method::Put, "/c"))
        .await
        .unwrap();

    for seen in server.requests() {
        assert_eq!(seen.header_count("content-length"), 1, "{}", seen.path);
        assert_eq!(seen.header("content-length"), Some("0"));
        assert!(seen.body.is_empty());
    }
}

#[tokio::test]
async fn test_streamed_put_is_chunked() {
    let server = serve(|_, _| (201, vec![], String::new())).await;
    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let endpoint = put_server_endpoint(&server);

    let source = StreamSource::new(std::io::Cursor::new(b"piped input".to_vec()));
    let request = Request::new(Method::Put, "/c/piped").body(Body::Stream(source));
    let response = backend.send(&endpoint, request).await.unwrap();
    assert_eq!(response.status, 201);

    let requests = server.requests();
    assert_eq!(requests[0].header("content-length"), None);
    assert_eq!(requests[0].header("transfer-encoding"), Some("chunked"));
    assert_eq!(requests[0].body, "piped input");
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend = HttpBackend::new(HttpOptions::default()).unwrap();
    let endpoint = Endpoint::new(format!("http://{addr}/v1/AUTH_test"), "AUTH_tk1");
    let err = backend
        .send(&endpoint, Request::new(Method::Head, "/c/o"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert!(err.is_retryable());
}
