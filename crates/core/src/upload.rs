//! Concurrent segment upload and manifest commit

use futures::{StreamExt, TryStreamExt, stream};

use crate::error::{Error, Result};
use crate::manifest::{ManifestRecord, SegmentDescriptor};
use crate::path::quote;
use crate::planner::{Source, TransferSpec};
use crate::session::Session;
use crate::traits::{MTIME_HEADER, Method, Request};

/// Uploads the segments of one object, then writes its manifest
#[derive(Clone)]
pub struct SegmentUploader {
    session: Session,
}

impl SegmentUploader {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Upload every segment and commit the manifest
    pub async fn upload(&self, spec: &TransferSpec, record: ManifestRecord) -> Result<ManifestRecord> {
        let record = self.upload_segments(spec, record).await?;
        self.commit(spec, &record).await?;
        Ok(record)
    }

    /// Upload every segment, returning the record with etags filled in
    ///
    /// Segments run under the shared gate, at most `capacity` scheduled at a
    /// time. The first permanent failure fails the whole upload; segments
    /// already stored are left in place.
    pub async fn upload_segments(
        &self,
        spec: &TransferSpec,
        record: ManifestRecord,
    ) -> Result<ManifestRecord> {
        let Some(source) = spec.source.as_ref() else {
            return Err(Error::General(format!(
                "upload of {} has no source",
                spec.path
            )));
        };

        self.ensure_container(&record.segment_container).await?;

        let ManifestRecord {
            kind,
            segment_container,
            prefix,
            segments,
        } = record;
        let count = segments.len();
        let capacity = self.session.gate().capacity();

        let result: Result<Vec<SegmentDescriptor>> = stream::iter(segments)
            .map(|segment| self.put_segment(source, segment))
            .buffer_unordered(capacity)
            .try_collect()
            .await;

        let mut segments = match result {
            Ok(segments) => segments,
            Err(e) => {
                tracing::warn!(
                    path = %spec.path,
                    prefix = %format!("{segment_container}/{prefix}"),
                    error = %e,
                    "Segment upload failed; segments already stored are left in place"
                );
                return Err(e);
            }
        };
        segments.sort_by_key(|s| s.index);
        tracing::debug!(path = %spec.path, segments = count, "All segments uploaded");

        Ok(ManifestRecord {
            kind,
            segment_container,
            prefix,
            segments,
        })
    }

    /// Write the manifest object
    pub async fn commit(&self, spec: &TransferSpec, record: &ManifestRecord) -> Result<()> {
        let mut headers = spec.headers.clone();
        if let Some(mtime) = spec.mtime_header() {
            headers.insert(MTIME_HEADER.into(), mtime);
        }
        let request = record.write_request(&spec.path, &headers)?;
        self.session.send(request).await?;
        tracing::debug!(
            path = %spec.path,
            manifest = %record.kind,
            segments = record.segments.len(),
            "Manifest written"
        );
        Ok(())
    }

    async fn ensure_container(&self, container: &str) -> Result<()> {
        let request = Request::new(Method::Put, format!("/{}", quote(container)))
            .header("content-length", "0");
        self.session.send(request).await?;
        Ok(())
    }

    async fn put_segment(
        &self,
        source: &Source,
        mut segment: SegmentDescriptor,
    ) -> Result<SegmentDescriptor> {
        let request = Request::new(Method::Put, segment.path.request_path())
            .header("content-length", segment.length.to_string())
            .body(source.body(segment.offset, segment.length));

        tracing::debug!(
            segment = segment.index,
            path = %segment.path,
            size = segment.length,
            "Uploading segment"
        );
        let (headers, _) = self.session.send(request).await?;

        segment.etag = match headers.get("etag") {
            Some(etag) => Some(etag.trim_matches('"').to_string()),
            None => self.head_etag(&segment).await?,
        };
        Ok(segment)
    }

    async fn head_etag(&self, segment: &SegmentDescriptor) -> Result<Option<String>> {
        let request = Request::new(Method::Head, segment.path.request_path());
        let (headers, _) = self.session.send(request).await?;
        Ok(headers.get("etag").map(|e| e.trim_matches('"').to_string()))
    }
}
