//! Per-transfer entry points
//!
//! Each upload or download moves through
//! `PLANNING -> IN_FLIGHT -> [COMMITTING] -> DONE`, or ends in `FAILED`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use humansize::{BINARY, format_size};
use serde::Serialize;

use crate::alias::RetryConfig;
use crate::body::{Body, ByteStream};
use crate::download::{Download, ListingEntry, SegmentDownloader};
use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::manifest::ManifestKind;
use crate::path::{ObjectPath, quote};
use crate::planner::{Direction, Plan, TransferSpec, UploadCondition, UploadOptions, plan};
use crate::session::Session;
use crate::token::TokenCache;
use crate::traits::{Backend, MTIME_HEADER, Method, ObjectInfo, Request};
use crate::upload::SegmentUploader;

/// Content type of the marker objects that stand for empty directories
pub const DIRECTORY_CONTENT_TYPE: &str = "text/directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Planning,
    InFlight,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferState::Planning => "PLANNING",
            TransferState::InFlight => "IN_FLIGHT",
            TransferState::Committing => "COMMITTING",
            TransferState::Done => "DONE",
            TransferState::Failed => "FAILED",
        })
    }
}

/// Result of one upload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UploadOutcome {
    Uploaded {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
    },
    Segmented {
        path: String,
        size_bytes: u64,
        manifest: ManifestKind,
        segments: usize,
    },
    Skipped {
        path: String,
        reason: String,
    },
}

impl UploadOutcome {
    pub fn path(&self) -> &str {
        match self {
            UploadOutcome::Uploaded { path, .. }
            | UploadOutcome::Segmented { path, .. }
            | UploadOutcome::Skipped { path, .. } => path,
        }
    }
}

/// One object written by a tree download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Downloaded {
    pub path: String,
    pub file: PathBuf,
    pub size_bytes: u64,
}

/// Ties planning, upload, and download together for one client session
#[derive(Clone)]
pub struct Orchestrator {
    session: Session,
    uploader: SegmentUploader,
    downloader: SegmentDownloader,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        tokens: Arc<TokenCache>,
        retry: RetryConfig,
        gate: ConcurrencyGate,
    ) -> Self {
        Self::from_session(Session::new(backend, tokens, retry, gate))
    }

    pub fn from_session(session: Session) -> Self {
        Self {
            uploader: SegmentUploader::new(session.clone()),
            downloader: SegmentDownloader::new(session.clone()),
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Upload one object, segmenting it when it exceeds the segment size
    pub async fn upload(&self, spec: TransferSpec) -> Result<UploadOutcome> {
        if spec.direction != Direction::Upload {
            return Err(Error::General(format!("{} is not an upload", spec.path)));
        }
        let result = self.run_upload(&spec).await;
        finish(&spec.path, &result);
        result
    }

    async fn run_upload(&self, spec: &TransferSpec) -> Result<UploadOutcome> {
        transition(&spec.path, TransferState::Planning);
        let plan = plan(spec)?;

        if let Some(reason) = self.skip_reason(spec).await? {
            tracing::debug!(path = %spec.path, reason = %reason, "Upload skipped");
            return Ok(UploadOutcome::Skipped {
                path: spec.path.to_string(),
                reason,
            });
        }

        match plan {
            Plan::Segmented(record) => {
                tracing::debug!(
                    path = %spec.path,
                    size = %format_size(record.total_size(), BINARY),
                    segments = record.segments.len(),
                    manifest = %record.kind,
                    "Segmenting upload"
                );
                transition(&spec.path, TransferState::InFlight);
                let record = self.uploader.upload_segments(spec, record).await?;

                transition(&spec.path, TransferState::Committing);
                self.uploader.commit(spec, &record).await?;

                Ok(UploadOutcome::Segmented {
                    path: spec.path.to_string(),
                    size_bytes: record.total_size(),
                    manifest: record.kind,
                    segments: record.segments.len(),
                })
            }
            Plan::Single => {
                transition(&spec.path, TransferState::InFlight);
                self.put_single(spec).await
            }
            Plan::Deferred => Err(Error::General(format!("{} is not an upload", spec.path))),
        }
    }

    async fn put_single(&self, spec: &TransferSpec) -> Result<UploadOutcome> {
        let source = spec
            .source
            .as_ref()
            .ok_or_else(|| Error::General(format!("upload of {} has no source", spec.path)))?;
        let body = source.body(0, spec.length.unwrap_or_default());

        let mut request = Request::new(Method::Put, spec.path.request_path())
            .headers(&spec.headers)
            .body(body);
        if let Some(length) = request.body.content_length() {
            request = request.header("content-length", length.to_string());
        }
        if let Some(mtime) = spec.mtime_header() {
            request = request.header(MTIME_HEADER, mtime);
        }

        let (headers, _) = self.session.send(request).await?;
        Ok(UploadOutcome::Uploaded {
            path: spec.path.to_string(),
            size_bytes: spec.length,
            etag: headers.get("etag").map(|e| e.trim_matches('"').to_string()),
        })
    }

    /// Why a conditional upload should not happen, if it should not
    async fn skip_reason(&self, spec: &TransferSpec) -> Result<Option<String>> {
        if spec.condition == UploadCondition::Always {
            return Ok(None);
        }
        let (Some(local_mtime), Some(local_size)) = (spec.mtime, spec.length) else {
            return Ok(None);
        };

        let remote = match self.head(&spec.path).await {
            Ok(info) => info,
            Err(e) if matches!(e.root(), Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(remote_mtime) = remote.mtime else {
            return Ok(None);
        };
        // Stored times carry six decimals.
        let local_mtime: f64 = format!("{local_mtime:.6}").parse().unwrap_or(local_mtime);

        let reason = match spec.condition {
            UploadCondition::Newer if local_mtime <= remote_mtime => {
                Some("stored copy is not older".to_string())
            }
            UploadCondition::Different
                if local_mtime == remote_mtime && remote.size_bytes == Some(local_size) =>
            {
                Some("stored copy has the same size and mtime".to_string())
            }
            _ => None,
        };
        Ok(reason)
    }

    /// Download one object as an ordered byte stream
    pub async fn download(&self, spec: TransferSpec) -> Result<Download> {
        if spec.direction != Direction::Download {
            return Err(Error::General(format!("{} is not a download", spec.path)));
        }
        transition(&spec.path, TransferState::Planning);
        plan(&spec)?;
        let result = self.downloader.download(&spec.path).await;
        match &result {
            Ok(download) => {
                tracing::debug!(
                    path = %spec.path,
                    state = %TransferState::InFlight,
                    segments = download.segments,
                    "Transfer state"
                );
            }
            Err(_) => finish(&spec.path, &result),
        }
        result
    }

    /// Download one object into a local file, creating parent directories
    ///
    /// Returns the number of bytes written.
    pub async fn download_to(&self, spec: TransferSpec, dest: impl AsRef<Path>) -> Result<u64> {
        let path = spec.path.clone();
        let download = self.download(spec).await?;
        self.save(&path, download.stream, dest).await
    }

    /// Write the stream of a started download of `path` to `dest`
    ///
    /// Parent directories are created. Returns the bytes written.
    pub async fn save(
        &self,
        path: &ObjectPath,
        stream: ByteStream,
        dest: impl AsRef<Path>,
    ) -> Result<u64> {
        let dest = dest.as_ref();
        let result = async {
            if let Some(parent) = dest.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::File::create(dest).await?;
            stream.write_to(&mut file).await
        }
        .await;
        finish(path, &result);
        result
    }

    /// Upload every file under `dir` to `{dest}/{relative path}`
    ///
    /// Empty directories become zero-byte `text/directory` marker objects.
    /// Files upload `capacity` at a time and their segment requests draw from
    /// the same gate.
    pub async fn upload_tree(
        &self,
        dir: impl AsRef<Path>,
        dest: &ObjectPath,
        options: &UploadOptions,
    ) -> Result<Vec<UploadOutcome>> {
        let dir = dir.as_ref();
        let (files, empty_dirs) = walk(dir).await?;
        tracing::debug!(
            dir = %dir.display(),
            files = files.len(),
            empty_dirs = empty_dirs.len(),
            "Uploading directory"
        );

        let mut specs = Vec::with_capacity(files.len());
        for file in &files {
            let target = dest.join(&relative_name(dir, file));
            specs.push(TransferSpec::from_file(target, file, options).await?);
        }

        let capacity = self.session.gate().capacity();
        let mut outcomes: Vec<UploadOutcome> = stream::iter(specs)
            .map(|spec| self.upload(spec))
            .buffer_unordered(capacity)
            .try_collect()
            .await?;

        let markers: Vec<UploadOutcome> = stream::iter(empty_dirs)
            .map(|d| self.put_directory_marker(dest.join(&relative_name(dir, &d))))
            .buffer_unordered(capacity)
            .try_collect()
            .await?;
        outcomes.extend(markers);
        outcomes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(outcomes)
    }

    async fn put_directory_marker(&self, path: ObjectPath) -> Result<UploadOutcome> {
        let request = Request::new(Method::Put, path.request_path())
            .header("content-type", DIRECTORY_CONTENT_TYPE)
            .header("content-length", "0")
            .body(Body::Empty);
        self.session.send(request).await?;
        Ok(UploadOutcome::Uploaded {
            path: path.to_string(),
            size_bytes: Some(0),
            etag: None,
        })
    }

    pub async fn head(&self, path: &ObjectPath) -> Result<ObjectInfo> {
        self.downloader.head(path).await
    }

    /// Delete one object; segments of a manifest are left in place
    pub async fn delete(&self, path: &ObjectPath) -> Result<()> {
        let request = Request::new(Method::Delete, path.request_path());
        self.session.send(request).await?;
        Ok(())
    }

    /// Every object in `container` whose name starts with `prefix`
    pub async fn list(&self, container: &str, prefix: &str) -> Result<Vec<ListingEntry>> {
        self.downloader.list(container, prefix).await
    }

    /// Download every object under `prefix` in `container` into `dir`
    ///
    /// Each object lands at `dir/{object name}`; `text/directory` markers
    /// become directories. Objects download `capacity` at a time and their
    /// segment requests draw from the same gate.
    pub async fn download_tree(
        &self,
        container: &str,
        prefix: &str,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<Downloaded>> {
        let dir = dir.as_ref();
        let entries = self.list(container, prefix).await?;
        tracing::debug!(
            container,
            prefix,
            objects = entries.len(),
            "Downloading listing"
        );

        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            let file = local_path(dir, &entry.name)?;
            jobs.push((entry, file));
        }

        let capacity = self.session.gate().capacity();
        let mut downloaded: Vec<Downloaded> = stream::iter(jobs)
            .map(|(entry, file)| async move {
                let path = ObjectPath::new(container, &entry.name);
                let size_bytes = if entry.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE) {
                    tokio::fs::create_dir_all(&file).await?;
                    0
                } else {
                    self.download_to(TransferSpec::download(path.clone()), &file)
                        .await?
                };
                Ok::<_, Error>(Downloaded {
                    path: path.to_string(),
                    file,
                    size_bytes,
                })
            })
            .buffer_unordered(capacity)
            .try_collect()
            .await?;
        downloaded.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(downloaded)
    }

    /// Delete every object in `container`, returning the names deleted
    ///
    /// One pass deletes what the first listing returned. With `until_empty`
    /// the container is listed again until nothing remains. Objects that
    /// vanish first are not an error.
    pub async fn empty_container(&self, container: &str, until_empty: bool) -> Result<Vec<String>> {
        let capacity = self.session.gate().capacity();
        let mut deleted = Vec::new();
        loop {
            let entries = self.list(container, "").await?;
            if entries.is_empty() {
                break;
            }
            let names: Vec<String> = stream::iter(entries)
                .map(|entry| async move {
                    let path = ObjectPath::new(container, &entry.name);
                    match self.delete(&path).await {
                        Ok(()) | Err(Error::NotFound(_)) => Ok(entry.name),
                        Err(e) => Err(e),
                    }
                })
                .buffer_unordered(capacity)
                .try_collect()
                .await?;
            tracing::debug!(container, deleted = names.len(), "Emptied listing page");
            deleted.extend(names);
            if !until_empty {
                break;
            }
        }
        deleted.sort();
        Ok(deleted)
    }

    /// Delete `container` itself; the server refuses while it holds objects
    pub async fn delete_container(&self, container: &str) -> Result<()> {
        let request = Request::new(Method::Delete, format!("/{}", quote(container)));
        self.session.send(request).await?;
        Ok(())
    }
}

/// Local file for object `name` below `dir`
///
/// Names that would escape `dir` are rejected.
fn local_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut path = dir.to_path_buf();
    for part in name.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." {
            return Err(Error::InvalidPath(format!(
                "object '{name}' would be written outside {}",
                dir.display()
            )));
        }
        path.push(part);
    }
    if path == dir {
        return Err(Error::InvalidPath(format!("object '{name}' has no file name")));
    }
    Ok(path)
}

fn transition(path: &ObjectPath, state: TransferState) {
    tracing::debug!(path = %path, state = %state, "Transfer state");
}

fn finish<T>(path: &ObjectPath, result: &Result<T>) {
    match result {
        Ok(_) => transition(path, TransferState::Done),
        Err(e) => tracing::warn!(
            path = %path,
            state = %TransferState::Failed,
            error = %e,
            "Transfer failed"
        ),
    }
}

/// Object name for `file` relative to `root`, with `/` separators
fn relative_name(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Regular files and empty directories below `root`
async fn walk(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut empty_dirs = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut is_empty = true;
        while let Some(entry) = entries.next_entry().await? {
            is_empty = false;
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                pending.push(entry.path());
            } else if kind.is_file() {
                files.push(entry.path());
            }
        }
        if is_empty && dir != root {
            empty_dirs.push(dir);
        }
    }
    files.sort();
    empty_dirs.sort();
    Ok((files, empty_dirs))
}
