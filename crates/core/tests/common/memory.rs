//! In-memory object store speaking the storage wire protocol
//!
//! Records how many requests are in flight at once, and can inject delays,
//! failures, and refused tokens.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use sha2::{Digest, Sha256};

use st_core::manifest::SloEntry;
use st_core::traits::{OBJECT_MANIFEST_HEADER, STATIC_LARGE_OBJECT_HEADER};
use st_core::{Backend, Endpoint, Error, Headers, Method, Request, Response, Result};

#[derive(Debug, Clone)]
struct Stored {
    body: Bytes,
    etag: String,
    headers: Headers,
    slo: Option<Vec<SloEntry>>,
}

impl Stored {
    fn content_length(&self) -> u64 {
        match &self.slo {
            Some(entries) => entries.iter().map(|e| e.size_bytes).sum(),
            None => self.body.len() as u64,
        }
    }
}

struct Failure {
    method: Method,
    needle: String,
    /// 0 means a transport error
    status: u16,
    remaining: usize,
}

struct Refusal {
    token: String,
    after_requests: usize,
}

#[derive(Default)]
struct State {
    containers: BTreeSet<String>,
    objects: BTreeMap<(String, String), Stored>,
    failures: Vec<Failure>,
    refusals: Vec<Refusal>,
    delays: Vec<(String, Duration)>,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: AtomicUsize,
    page_size: AtomicUsize,
    omit_put_etag: AtomicBool,
    base_delay: Mutex<Duration>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn etag_of(data: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(data));
    digest[..32].to_string()
}

/// Split a percent-encoded request path into container and object
fn split(path: &str) -> (String, Option<String>) {
    let decode = |s: &str| {
        urlencoding::decode(s)
            .map(|d| d.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    let (c, o) = split_raw(path);
    (decode(&c), o.map(|o| decode(&o)))
}

/// Split an unencoded path, as listed in a static manifest
fn split_raw(path: &str) -> (String, Option<String>) {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((c, o)) if !o.is_empty() => (c.to_string(), Some(o.to_string())),
        Some((c, _)) => (c.to_string(), None),
        None => (path.to_string(), None),
    }
}

fn json_response(status: u16, value: serde_json::Value) -> Response {
    let body = serde_json::to_vec(&value).unwrap_or_default();
    let mut response = Response::new(status);
    response
        .headers
        .insert("content-type".into(), "application/json".into());
    response
        .headers
        .insert("content-length".into(), body.len().to_string());
    response.body = body.into();
    response
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            page_size: AtomicUsize::new(1000),
            omit_put_etag: AtomicBool::new(false),
            base_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn create_container(&self, container: &str) {
        self.state.lock().unwrap().containers.insert(container.into());
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.state.lock().unwrap().containers.contains(container)
    }

    pub fn object(&self, container: &str, object: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(container.to_string(), object.to_string()))
            .map(|s| s.body.clone())
    }

    pub fn object_header(&self, container: &str, object: &str, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(container.to_string(), object.to_string()))
            .and_then(|s| s.headers.get(name).cloned())
    }

    /// Object names in `container`, sorted
    pub fn objects_in(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Replace an object's bytes without touching any manifest that lists it
    pub fn overwrite(&self, container: &str, object: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(stored) = state
            .objects
            .get_mut(&(container.to_string(), object.to_string()))
        {
            stored.body = Bytes::copy_from_slice(data);
            stored.etag = etag_of(data);
        }
    }

    /// Fail the next `times` requests whose path contains `needle`
    pub fn fail(&self, method: Method, needle: &str, status: u16, times: usize) {
        self.state.lock().unwrap().failures.push(Failure {
            method,
            needle: needle.into(),
            status,
            remaining: times,
        });
    }

    /// Answer 401 to `token` once more than `after_requests` requests have arrived
    pub fn refuse_token(&self, token: &str, after_requests: usize) {
        self.state.lock().unwrap().refusals.push(Refusal {
            token: token.into(),
            after_requests,
        });
    }

    /// Delay requests whose path contains `needle`
    pub fn delay(&self, needle: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .push((needle.into(), delay));
    }

    /// Delay every request
    pub fn delay_all(&self, delay: Duration) {
        *self.base_delay.lock().unwrap() = delay;
    }

    pub fn set_page_size(&self, n: usize) {
        self.page_size.store(n.max(1), Ordering::SeqCst);
    }

    /// Leave the etag header off PUT responses
    pub fn omit_put_etag(&self, omit: bool) {
        self.omit_put_etag.store(omit, Ordering::SeqCst);
    }

    /// Highest number of requests seen in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn injected(&self, request: &Request, token: &str, seq: usize) -> Option<u16> {
        let mut state = self.state.lock().unwrap();
        if state
            .refusals
            .iter()
            .any(|r| r.token == token && seq > r.after_requests)
        {
            return Some(401);
        }
        let failure = state.failures.iter_mut().find(|f| {
            f.remaining > 0 && f.method == request.method && request.path.contains(&f.needle)
        })?;
        failure.remaining -= 1;
        Some(failure.status)
    }

    fn delay_for(&self, path: &str) -> Duration {
        let base = *self.base_delay.lock().unwrap();
        let state = self.state.lock().unwrap();
        state
            .delays
            .iter()
            .filter(|(needle, _)| path.contains(needle.as_str()))
            .map(|(_, d)| *d)
            .fold(base, |acc, d| acc + d)
    }

    fn handle(&self, request: &Request, body: Bytes) -> Response {
        let (container, object) = split(&request.path);
        let mut state = self.state.lock().unwrap();

        let Some(object) = object else {
            return match request.method {
                Method::Put => {
                    state.containers.insert(container);
                    Response::new(201)
                }
                Method::Get if state.containers.contains(&container) => {
                    self.list(&state, &container, request)
                }
                Method::Delete if state.containers.contains(&container) => {
                    if state.objects.keys().any(|(c, _)| *c == container) {
                        return Response::new(409);
                    }
                    state.containers.remove(&container);
                    Response::new(204)
                }
                _ => Response::new(404),
            };
        };
        let key = (container.clone(), object.clone());

        match request.method {
            Method::Put => {
                if !state.containers.contains(&container) {
                    return Response::new(404);
                }
                let mut headers: Headers = request
                    .headers
                    .iter()
                    .filter(|(k, _)| {
                        k.starts_with("x-object-") || k.as_str() == "content-type"
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();

                let (slo, etag) = if request.query.get("multipart-manifest").map(String::as_str)
                    == Some("put")
                {
                    let Ok(entries) = serde_json::from_slice::<Vec<SloEntry>>(&body) else {
                        return Response::new(400);
                    };
                    for entry in &entries {
                        let (c, o) = split_raw(&entry.path);
                        let Some(stored) = o.and_then(|o| state.objects.get(&(c, o))) else {
                            return Response::new(400);
                        };
                        if stored.body.len() as u64 != entry.size_bytes
                            || entry.etag.as_ref().is_some_and(|e| *e != stored.etag)
                        {
                            return Response::new(400);
                        }
                    }
                    headers.insert(STATIC_LARGE_OBJECT_HEADER.into(), "True".into());
                    let joined: String = entries.iter().filter_map(|e| e.etag.clone()).collect();
                    (Some(entries), etag_of(joined.as_bytes()))
                } else {
                    (None, etag_of(&body))
                };

                state.objects.insert(
                    key,
                    Stored {
                        body,
                        etag: etag.clone(),
                        headers,
                        slo,
                    },
                );
                let mut response = Response::new(201);
                if !self.omit_put_etag.load(Ordering::SeqCst) {
                    response.headers.insert("etag".into(), format!("\"{etag}\""));
                }
                response
            }
            Method::Head | Method::Get => {
                let Some(stored) = state.objects.get(&key) else {
                    return Response::new(404);
                };
                if request.method == Method::Get
                    && request.query.get("multipart-manifest").map(String::as_str) == Some("get")
                    && let Some(entries) = &stored.slo
                {
                    let listed: Vec<_> = entries
                        .iter()
                        .map(|e| json!({"name": e.path, "hash": e.etag, "bytes": e.size_bytes}))
                        .collect();
                    return json_response(200, json!(listed));
                }

                let mut response = Response::new(200);
                response.headers = stored.headers.clone();
                response
                    .headers
                    .insert("content-length".into(), stored.content_length().to_string());
                response
                    .headers
                    .insert("etag".into(), format!("\"{}\"", stored.etag));
                if request.method == Method::Get {
                    response.body = stored.body.clone().into();
                }
                response
            }
            Method::Delete => match state.objects.remove(&key) {
                Some(_) => Response::new(204),
                None => Response::new(404),
            },
            Method::Post => Response::new(405),
        }
    }

    fn list(&self, state: &State, container: &str, request: &Request) -> Response {
        let prefix = request.query.get("prefix").cloned().unwrap_or_default();
        let marker = request.query.get("marker").cloned().unwrap_or_default();
        let page_size = self.page_size.load(Ordering::SeqCst);

        let page: Vec<_> = state
            .objects
            .iter()
            .filter(|((c, o), _)| c == container && o.starts_with(&prefix) && *o > marker)
            .take(page_size)
            .map(|((_, o), s)| {
                json!({
                    "name": o,
                    "bytes": s.content_length(),
                    "hash": s.etag,
                    "content_type": s.headers.get("content-type"),
                })
            })
            .collect();
        json_response(200, json!(page))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn send(&self, endpoint: &Endpoint, request: Request) -> Result<Response> {
        let seq = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.delay_for(&request.path);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let body = request.body.clone().into_stream().await?.collect().await?;

        match self.injected(&request, &endpoint.auth_token, seq) {
            Some(0) => Err(Error::Network("connection reset by peer".into())),
            Some(status) => Ok(Response::new(status)),
            None => Ok(self.handle(&request, body)),
        }
    }
}
