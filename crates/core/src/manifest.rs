//! Large-object manifests
//!
//! A segmented object is addressed through a manifest object. A dynamic
//! manifest is an empty object whose `x-object-manifest` header names a
//! listing prefix; a static manifest is a JSON body listing every segment
//! with its size and etag, written with `?multipart-manifest=put`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::{ObjectPath, quote};
use crate::traits::{Headers, Method, OBJECT_MANIFEST_HEADER, Request};

/// Query parameter selecting static manifest handling
pub const MULTIPART_MANIFEST_QUERY: &str = "multipart-manifest";

/// Manifest strategy for a segmented object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    /// Membership resolved by listing a prefix at read time
    #[default]
    Dynamic,
    /// Fixed segment list stored in the manifest body
    Static,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Dynamic => f.write_str("dynamic"),
            ManifestKind::Static => f.write_str("static"),
        }
    }
}

impl FromStr for ManifestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" | "dlo" => Ok(ManifestKind::Dynamic),
            "static" | "slo" => Ok(ManifestKind::Static),
            other => Err(Error::Config(format!(
                "unknown manifest kind '{other}' (expected dynamic or static)"
            ))),
        }
    }
}

/// Segment size option: a byte count, prefixed with `s` for a static manifest
///
/// ```
/// use st_core::manifest::{ManifestKind, SegmentSetting};
///
/// let s: SegmentSetting = "s1048576".parse().unwrap();
/// assert_eq!(s.size, 1048576);
/// assert_eq!(s.manifest, ManifestKind::Static);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSetting {
    pub size: u64,
    pub manifest: ManifestKind,
}

impl FromStr for SegmentSetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (manifest, digits) = match s.strip_prefix(['s', 'S']) {
            Some(rest) => (ManifestKind::Static, rest),
            None => (ManifestKind::Dynamic, s),
        };
        let size: u64 = digits
            .parse()
            .map_err(|_| Error::Config(format!("invalid segment size '{s}'")))?;
        if size == 0 {
            return Err(Error::Config("segment size must be at least 1 byte".into()));
        }
        Ok(Self { size, manifest })
    }
}

impl fmt::Display for SegmentSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.manifest {
            ManifestKind::Static => write!(f, "s{}", self.size),
            ManifestKind::Dynamic => write!(f, "{}", self.size),
        }
    }
}

/// One segment of a large object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Position in the logical object; the only ordering key
    pub index: usize,
    /// Byte offset within the logical object
    pub offset: u64,
    pub length: u64,
    pub path: ObjectPath,
    /// Set after upload, or read from a static manifest
    pub etag: Option<String>,
}

/// Manifest entry as sent with `multipart-manifest=put` and returned by
/// `multipart-manifest=get` (which names the fields `name/hash/bytes`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SloEntry {
    #[serde(alias = "name")]
    pub path: String,
    #[serde(alias = "hash")]
    pub etag: Option<String>,
    #[serde(alias = "bytes")]
    pub size_bytes: u64,
}

/// Everything needed to write or read one manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub kind: ManifestKind,
    pub segment_container: String,
    /// Object-name prefix shared by the segments inside `segment_container`
    pub prefix: String,
    /// Ordered by index
    pub segments: Vec<SegmentDescriptor>,
}

impl ManifestRecord {
    /// Value of the `x-object-manifest` header: `{segment_container}/{prefix}`,
    /// percent-encoded since the server unquotes it
    pub fn manifest_prefix(&self) -> String {
        quote(&format!("{}/{}", self.segment_container, self.prefix))
    }

    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|s| s.length).sum()
    }

    /// Check that segment order matches index order and offsets are contiguous
    pub fn validate(&self) -> Result<()> {
        let mut offset = 0;
        for (position, segment) in self.segments.iter().enumerate() {
            if segment.index != position || segment.offset != offset {
                return Err(Error::SegmentIntegrity {
                    path: segment.path.to_string(),
                    detail: format!(
                        "segment {} at offset {} is out of order (expected {position} at {offset})",
                        segment.index, segment.offset
                    ),
                });
            }
            offset += segment.length;
        }
        Ok(())
    }

    /// Build the request that commits this manifest as `target`
    pub fn write_request(&self, target: &ObjectPath, headers: &Headers) -> Result<Request> {
        self.validate()?;
        let request = Request::new(Method::Put, target.request_path()).headers(headers);

        match self.kind {
            ManifestKind::Dynamic => Ok(request
                .header(OBJECT_MANIFEST_HEADER, self.manifest_prefix())
                .header("content-length", "0")),
            ManifestKind::Static => {
                let entries: Vec<SloEntry> = self
                    .segments
                    .iter()
                    .map(|s| SloEntry {
                        path: format!("/{}", s.path),
                        etag: s.etag.clone(),
                        size_bytes: s.length,
                    })
                    .collect();
                let body = serde_json::to_vec(&entries)?;
                Ok(request
                    .query(MULTIPART_MANIFEST_QUERY, "put")
                    .header("content-length", body.len().to_string())
                    .body(body))
            }
        }
    }
}

/// Parse a static manifest body into ordered segments
pub fn parse_static_manifest(body: &Bytes) -> Result<Vec<SegmentDescriptor>> {
    let entries: Vec<SloEntry> = serde_json::from_slice(body)?;
    let mut offset = 0;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let path = ObjectPath::parse(&entry.path)?;
            let segment = SegmentDescriptor {
                index,
                offset,
                length: entry.size_bytes,
                path,
                etag: entry.etag.map(|e| e.trim_matches('"').to_string()),
            };
            offset += entry.size_bytes;
            Ok(segment)
        })
        .collect()
}

/// Split an `x-object-manifest` value into container and prefix
pub fn split_manifest_prefix(value: &str) -> Result<(String, String)> {
    let value = value.trim_start_matches('/');
    let decoded = urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string());
    match decoded.split_once('/') {
        Some((container, prefix)) if !container.is_empty() => {
            Ok((container.to_string(), prefix.to_string()))
        }
        _ => Err(Error::InvalidPath(format!(
            "manifest prefix '{value}' does not name a container"
        ))),
    }
}
