//! Manifest resolution and ordered segment download
//!
//! Segments are fetched concurrently, but bytes reach the consumer strictly
//! in index order. [`OrderedSegments`] launches a segment only while it lies
//! within `window` of the next index to emit. The segment at the cursor is
//! forwarded chunk by chunk; segments fetched ahead of it are read into
//! memory, so at most `window - 1` segment bodies are ever buffered.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::Deserialize;

use crate::body::ByteStream;
use crate::error::{Error, Result};
use crate::manifest::{
    MULTIPART_MANIFEST_QUERY, ManifestKind, ManifestRecord, SegmentDescriptor,
    parse_static_manifest, split_manifest_prefix,
};
use crate::path::{ObjectPath, quote};
use crate::session::Session;
use crate::traits::{Headers, Method, ObjectInfo, Request};

/// A download in progress
#[derive(Debug)]
pub struct Download {
    /// Metadata of the addressed object
    pub info: ObjectInfo,
    /// Manifest kind when the object is segmented
    pub manifest: Option<ManifestKind>,
    pub segments: usize,
    /// Total bytes the stream will produce, when known
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// Entry of a JSON container listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    pub bytes: u64,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// How a segment body is delivered to the reorder buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// The segment is next to emit; forward its body as it arrives
    Stream,
    /// The segment is ahead of the cursor; read it fully
    Buffer,
}

type FetchFn =
    Box<dyn Fn(SegmentDescriptor, FetchMode) -> BoxFuture<'static, Result<ByteStream>> + Send>;

/// Reorder buffer yielding segment bodies in index order
pub struct OrderedSegments {
    segments: Vec<SegmentDescriptor>,
    fetch: FetchFn,
    in_flight: FuturesUnordered<BoxFuture<'static, (usize, Result<ByteStream>)>>,
    completed: BTreeMap<usize, ByteStream>,
    /// Body of segment `next_emit`, once it is available
    current: Option<ByteStream>,
    next_launch: usize,
    next_emit: usize,
    window: usize,
    failed: bool,
}

impl OrderedSegments {
    /// `segments` must be sorted by index and indexed from zero
    pub fn new<F>(segments: Vec<SegmentDescriptor>, window: usize, fetch: F) -> Self
    where
        F: Fn(SegmentDescriptor, FetchMode) -> BoxFuture<'static, Result<ByteStream>>
            + Send
            + 'static,
    {
        Self {
            segments,
            fetch: Box::new(fetch),
            in_flight: FuturesUnordered::new(),
            completed: BTreeMap::new(),
            current: None,
            next_launch: 0,
            next_emit: 0,
            window: window.max(1),
            failed: false,
        }
    }

    fn launch(&mut self) {
        while self.next_launch < self.segments.len()
            && self.next_launch < self.next_emit + self.window
        {
            let segment = self.segments[self.next_launch].clone();
            let index = self.next_launch;
            let mode = if index == self.next_emit {
                FetchMode::Stream
            } else {
                FetchMode::Buffer
            };
            let fut = (self.fetch)(segment, mode);
            self.in_flight.push(async move { (index, fut.await) }.boxed());
            self.next_launch += 1;
        }
    }

    fn fail(&mut self, index: usize, error: Error) -> Poll<Option<Result<Bytes>>> {
        tracing::debug!(segment = index, error = %error, "Segment download failed");
        self.failed = true;
        // Dropping the pending fetches releases their permits.
        self.in_flight = FuturesUnordered::new();
        self.completed.clear();
        self.current = None;
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for OrderedSegments {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.failed {
                return Poll::Ready(None);
            }

            if let Some(current) = this.current.as_mut() {
                match current.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
                    Poll::Ready(Some(Err(e))) => return this.fail(this.next_emit, e),
                    Poll::Ready(None) => {
                        this.current = None;
                        this.next_emit += 1;
                        continue;
                    }
                    Poll::Pending => {
                        // Keep the fetches ahead of the cursor moving.
                        this.launch();
                        while let Poll::Ready(Some((index, result))) =
                            this.in_flight.poll_next_unpin(cx)
                        {
                            match result {
                                Ok(body) => {
                                    this.completed.insert(index, body);
                                }
                                Err(e) => return this.fail(index, e),
                            }
                        }
                        return Poll::Pending;
                    }
                }
            }

            if let Some(body) = this.completed.remove(&this.next_emit) {
                this.current = Some(body);
                continue;
            }
            this.launch();

            match this.in_flight.poll_next_unpin(cx) {
                Poll::Ready(Some((index, Ok(body)))) => {
                    this.completed.insert(index, body);
                }
                Poll::Ready(Some((index, Err(e)))) => return this.fail(index, e),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Ends a segment body with an integrity error when its length is wrong
struct LengthChecked {
    inner: ByteStream,
    path: String,
    expected: u64,
    seen: u64,
    done: bool,
}

impl Stream for LengthChecked {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.seen += chunk.len() as u64;
                if this.seen > this.expected {
                    this.done = true;
                    return Poll::Ready(Some(Err(length_mismatch(
                        &this.path,
                        this.expected,
                        this.seen,
                    ))));
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.done = true;
                if this.seen != this.expected {
                    return Poll::Ready(Some(Err(length_mismatch(
                        &this.path,
                        this.expected,
                        this.seen,
                    ))));
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

fn length_mismatch(path: &str, expected: u64, got: u64) -> Error {
    Error::SegmentIntegrity {
        path: path.to_string(),
        detail: format!("expected {expected} bytes, got {got}"),
    }
}

/// Resolves manifests and streams segmented objects
#[derive(Clone)]
pub struct SegmentDownloader {
    session: Session,
}

impl SegmentDownloader {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn head(&self, path: &ObjectPath) -> Result<ObjectInfo> {
        let request = Request::new(Method::Head, path.request_path());
        let (headers, _) = self.session.send(request).await?;
        Ok(ObjectInfo::from_headers(path.to_string(), headers))
    }

    /// Resolve the ordered segment list of a manifest object
    pub async fn resolve(&self, path: &ObjectPath, info: &ObjectInfo) -> Result<Option<ManifestRecord>> {
        match info.manifest {
            None => Ok(None),
            Some(ManifestKind::Dynamic) => {
                let value = info.manifest_prefix.as_deref().unwrap_or_default();
                let (segment_container, prefix) = split_manifest_prefix(value)?;
                let segments = self.list_segments(&segment_container, &prefix).await?;
                Ok(Some(ManifestRecord {
                    kind: ManifestKind::Dynamic,
                    segment_container,
                    prefix,
                    segments,
                }))
            }
            Some(ManifestKind::Static) => {
                let request = Request::new(Method::Get, path.request_path())
                    .query(MULTIPART_MANIFEST_QUERY, "get");
                let (_, body) = self.session.send(request).await?;
                let segments = parse_static_manifest(&body)?;
                let record = ManifestRecord {
                    kind: ManifestKind::Static,
                    segment_container: path.segment_container(),
                    prefix: String::new(),
                    segments,
                };
                if let Some(listed) = info.size_bytes
                    && listed != record.total_size()
                {
                    return Err(Error::SegmentIntegrity {
                        path: path.to_string(),
                        detail: format!(
                            "manifest segments sum to {} bytes but the object reports {listed}",
                            record.total_size()
                        ),
                    });
                }
                Ok(Some(record))
            }
        }
    }

    /// Download `path`, reassembling segments when it is a manifest
    pub async fn download(&self, path: &ObjectPath) -> Result<Download> {
        let info = self.head(path).await?;
        match self.resolve(path, &info).await? {
            Some(record) => {
                tracing::debug!(
                    path = %path,
                    manifest = %record.kind,
                    segments = record.segments.len(),
                    "Downloading segmented object"
                );
                let content_length = Some(record.total_size());
                let kind = record.kind;
                let segments = record.segments.len();
                Ok(Download {
                    info,
                    manifest: Some(kind),
                    segments,
                    content_length,
                    stream: self.stream_segments(record),
                })
            }
            None => {
                let request = Request::new(Method::Get, path.request_path());
                let response = self.session.send_streaming(request).await?;
                let content_length = response.content_length().or(info.size_bytes);
                Ok(Download {
                    info,
                    manifest: None,
                    segments: 0,
                    content_length,
                    stream: response.body,
                })
            }
        }
    }

    /// Stream the segments of `record` in index order
    pub fn stream_segments(&self, record: ManifestRecord) -> ByteStream {
        let verify = record.kind == ManifestKind::Static;
        let window = self.session.gate().capacity();
        let session = self.session.clone();
        ByteStream::new(OrderedSegments::new(record.segments, window, move |segment, mode| {
            let session = session.clone();
            async move { fetch_segment(&session, segment, mode, verify).await }.boxed()
        }))
    }

    /// List `prefix` in `container`, paging by marker until an empty page
    pub async fn list(&self, container: &str, prefix: &str) -> Result<Vec<ListingEntry>> {
        let mut entries: Vec<ListingEntry> = Vec::new();
        let mut marker = String::new();
        loop {
            let mut request = Request::new(Method::Get, format!("/{}", quote(container)))
                .query("format", "json")
                .query("prefix", prefix);
            if !marker.is_empty() {
                request = request.query("marker", marker.as_str());
            }
            let (_, body) = self.session.send(request).await?;
            let page: Vec<ListingEntry> = serde_json::from_slice(&body)?;
            let Some(last) = page.last() else {
                break;
            };
            marker = last.name.clone();
            entries.extend(page);
        }
        Ok(entries)
    }

    async fn list_segments(&self, container: &str, prefix: &str) -> Result<Vec<SegmentDescriptor>> {
        let mut entries = self.list(container, prefix).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut offset = 0;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let segment = SegmentDescriptor {
                    index,
                    offset,
                    length: entry.bytes,
                    path: ObjectPath::new(container, entry.name),
                    etag: entry.hash,
                };
                offset += entry.bytes;
                segment
            })
            .collect())
    }
}

async fn fetch_segment(
    session: &Session,
    segment: SegmentDescriptor,
    mode: FetchMode,
    verify: bool,
) -> Result<ByteStream> {
    let request = Request::new(Method::Get, segment.path.request_path());
    match mode {
        FetchMode::Buffer => {
            let (headers, body) = session.send(request).await?;
            if verify {
                check_etag(&segment, &headers)?;
                if body.len() as u64 != segment.length {
                    return Err(length_mismatch(
                        &segment.path.to_string(),
                        segment.length,
                        body.len() as u64,
                    ));
                }
            }
            tracing::debug!(segment = segment.index, path = %segment.path, "Segment buffered");
            Ok(ByteStream::from(body))
        }
        FetchMode::Stream => {
            let response = session.send_streaming(request).await?;
            tracing::debug!(segment = segment.index, path = %segment.path, "Streaming segment");
            if !verify {
                return Ok(response.body);
            }
            check_etag(&segment, &response.headers)?;
            Ok(ByteStream::new(LengthChecked {
                inner: response.body,
                path: segment.path.to_string(),
                expected: segment.length,
                seen: 0,
                done: false,
            }))
        }
    }
}

fn check_etag(segment: &SegmentDescriptor, headers: &Headers) -> Result<()> {
    let stored = headers.get("etag").map(|e| e.trim_matches('"'));
    if let (Some(expected), Some(stored)) = (segment.etag.as_deref(), stored)
        && !expected.eq_ignore_ascii_case(stored)
    {
        return Err(Error::SegmentIntegrity {
            path: segment.path.to_string(),
            detail: format!("etag {stored} does not match manifest etag {expected}"),
        });
    }
    Ok(())
}
