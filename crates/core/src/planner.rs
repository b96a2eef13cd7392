//! Transfer descriptions and segment planning

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::body::{Body, StreamSource};
use crate::config::{DEFAULT_SEGMENT_SIZE, TransferDefaults};
use crate::error::{Error, Result};
use crate::manifest::{ManifestKind, ManifestRecord, SegmentDescriptor, SegmentSetting};
use crate::path::ObjectPath;
use crate::traits::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Where upload bytes come from
#[derive(Debug, Clone)]
pub enum Source {
    /// A seekable local file
    File(PathBuf),
    Bytes(Bytes),
    /// Piped input of unknown length
    Reader(StreamSource),
}

impl Source {
    /// Body for `length` bytes starting at `offset`
    pub fn body(&self, offset: u64, length: u64) -> Body {
        match self {
            Source::File(path) => Body::File {
                path: path.clone(),
                offset,
                length,
            },
            Source::Bytes(b) => {
                let start = (offset as usize).min(b.len());
                let end = (start + length as usize).min(b.len());
                Body::Bytes(b.slice(start..end))
            }
            Source::Reader(s) => Body::Stream(s.clone()),
        }
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self, Source::Reader(_))
    }
}

/// When an upload should be skipped because the destination is current
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadCondition {
    #[default]
    Always,
    /// Only if the local file is newer than the stored copy
    Newer,
    /// Only if size or modification time differ
    Different,
}

/// Settings shared by every upload of one invocation
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub segment_size: u64,
    pub manifest: ManifestKind,
    pub condition: UploadCondition,
    /// Ask for size-based segmentation of piped input
    pub stream_segmentation: bool,
    /// Extra headers for the primary object
    pub headers: Headers,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            manifest: ManifestKind::Dynamic,
            condition: UploadCondition::Always,
            stream_segmentation: false,
            headers: Headers::new(),
        }
    }
}

impl From<&TransferDefaults> for UploadOptions {
    fn from(defaults: &TransferDefaults) -> Self {
        Self {
            segment_size: defaults.segment_size,
            manifest: defaults.manifest,
            ..Self::default()
        }
    }
}

impl UploadOptions {
    pub fn segment_setting(mut self, setting: SegmentSetting) -> Self {
        self.segment_size = setting.size;
        self.manifest = setting.manifest;
        self
    }
}

/// One logical PUT or GET
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub path: ObjectPath,
    pub direction: Direction,
    /// Upload source; `None` for downloads
    pub source: Option<Source>,
    /// Source length when known
    pub length: Option<u64>,
    /// Local modification time, seconds since the epoch
    pub mtime: Option<f64>,
    pub segment_size: u64,
    pub manifest: ManifestKind,
    pub condition: UploadCondition,
    pub stream_segmentation: bool,
    pub headers: Headers,
}

impl TransferSpec {
    fn upload(
        path: ObjectPath,
        source: Source,
        length: Option<u64>,
        mtime: Option<f64>,
        options: &UploadOptions,
    ) -> Self {
        Self {
            path,
            direction: Direction::Upload,
            source: Some(source),
            length,
            mtime,
            segment_size: options.segment_size,
            manifest: options.manifest,
            condition: options.condition,
            stream_segmentation: options.stream_segmentation,
            headers: options.headers.clone(),
        }
    }

    /// Upload a local file; length and mtime come from its metadata
    pub async fn from_file(
        path: ObjectPath,
        file: impl AsRef<Path>,
        options: &UploadOptions,
    ) -> Result<Self> {
        let file = file.as_ref();
        let meta = tokio::fs::metadata(file).await?;
        if !meta.is_file() {
            return Err(Error::InvalidPath(format!(
                "{} is not a regular file",
                file.display()
            )));
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        let mut spec = Self::upload(
            path,
            Source::File(file.to_path_buf()),
            Some(meta.len()),
            mtime,
            options,
        );
        if !spec.headers.contains_key("content-type")
            && let Some(mime) = mime_guess::from_path(file).first()
        {
            spec.headers
                .insert("content-type".into(), mime.essence_str().to_string());
        }
        Ok(spec)
    }

    pub fn from_bytes(path: ObjectPath, bytes: impl Into<Bytes>, options: &UploadOptions) -> Self {
        let bytes = bytes.into();
        let length = bytes.len() as u64;
        Self::upload(path, Source::Bytes(bytes), Some(length), Some(now()), options)
    }

    /// Upload piped input of unknown length
    pub fn from_reader(
        path: ObjectPath,
        reader: impl AsyncRead + Send + Unpin + 'static,
        options: &UploadOptions,
    ) -> Self {
        let source = Source::Reader(StreamSource::new(reader));
        Self::upload(path, source, None, Some(now()), options)
    }

    pub fn download(path: ObjectPath) -> Self {
        Self {
            path,
            direction: Direction::Download,
            source: None,
            length: None,
            mtime: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            manifest: ManifestKind::Dynamic,
            condition: UploadCondition::Always,
            stream_segmentation: false,
            headers: Headers::new(),
        }
    }

    /// `x-object-meta-mtime` value, six decimal places
    pub fn mtime_header(&self) -> Option<String> {
        self.mtime.map(|m| format!("{m:.6}"))
    }
}

fn now() -> f64 {
    let ts = jiff::Timestamp::now();
    ts.as_second() as f64 + f64::from(ts.subsec_nanosecond()) / 1e9
}

/// What the planner decided for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// One object, no segmentation
    Single,
    /// Segments to upload, with the manifest that will tie them together
    Segmented(ManifestRecord),
    /// Downloads are planned once the manifest has been read
    Deferred,
}

/// Decide whether and how to segment a transfer
pub fn plan(spec: &TransferSpec) -> Result<Plan> {
    if spec.direction == Direction::Download {
        return Ok(Plan::Deferred);
    }
    if spec.segment_size == 0 {
        return Err(Error::Config("segment size must be at least 1 byte".into()));
    }
    let source = spec
        .source
        .as_ref()
        .ok_or_else(|| Error::General(format!("upload of {} has no source", spec.path)))?;

    let Some(length) = spec.length.filter(|_| source.is_seekable()) else {
        if spec.stream_segmentation {
            return Err(Error::UnsupportedFeature(
                "segmenting piped input is not supported; piped uploads must fit in one object"
                    .into(),
            ));
        }
        return Ok(Plan::Single);
    };

    if length <= spec.segment_size {
        return Ok(Plan::Single);
    }

    let segment_container = spec.path.segment_container();
    let prefix = format!(
        "{}/{}/{length}/",
        spec.path.object,
        spec.mtime_header().unwrap_or_else(|| "0.000000".into())
    );
    let segments = segment_ranges(length, spec.segment_size)
        .into_iter()
        .enumerate()
        .map(|(index, (offset, len))| SegmentDescriptor {
            index,
            offset,
            length: len,
            path: ObjectPath::new(&segment_container, format!("{prefix}{index:08}")),
            etag: None,
        })
        .collect();

    Ok(Plan::Segmented(ManifestRecord {
        kind: spec.manifest,
        segment_container,
        prefix,
        segments,
    }))
}

/// Contiguous `(offset, length)` ranges; only the last may be short
pub fn segment_ranges(length: u64, segment_size: u64) -> Vec<(u64, u64)> {
    let segment_size = segment_size.max(1);
    let count = length.div_ceil(segment_size);
    (0..count)
        .map(|i| {
            let offset = i * segment_size;
            (offset, segment_size.min(length - offset))
        })
        .collect()
}
