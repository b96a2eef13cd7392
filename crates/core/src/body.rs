//! Request bodies and response byte streams
//!
//! A [`Body`] must be re-sendable for the retry policy to repeat a request,
//! so file data is described by range and re-opened on every attempt. Only a
//! piped [`Body::Stream`] is single-use.

use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Read size used when streaming file or pipe data
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Boxed async reader used for piped input
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// A single-use reader that can be shared between clones of a request
#[derive(Clone)]
pub struct StreamSource(Arc<Mutex<Option<BoxReader>>>);

impl StreamSource {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(reader)))))
    }

    /// Take the reader; fails on every call after the first
    pub fn take(&self) -> Result<BoxReader> {
        self.0
            .lock()
            .map_err(|_| Error::General("stream source lock poisoned".into()))?
            .take()
            .ok_or_else(|| Error::General("cannot replay a streamed body".into()))
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamSource(..)")
    }
}

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// A byte range of a local file
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// Piped input of unknown length
    Stream(StreamSource),
}

impl Body {
    /// Length when known up front
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::File { length, .. } => Some(*length),
            Body::Stream(_) => None,
        }
    }

    /// Open the body as a chunked byte stream
    pub async fn into_stream(self) -> Result<ByteStream> {
        match self {
            Body::Empty => Ok(ByteStream::empty()),
            Body::Bytes(b) => Ok(ByteStream::from(b)),
            Body::File {
                path,
                offset,
                length,
            } => {
                let mut file = tokio::fs::File::open(&path).await?;
                file.seek(SeekFrom::Start(offset)).await?;
                Ok(reader_stream(Box::new(file.take(length))))
            }
            Body::Stream(source) => Ok(reader_stream(source.take()?)),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

fn reader_stream(reader: BoxReader) -> ByteStream {
    ByteStream::new(stream::try_unfold(reader, |mut reader| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let n = reader.read_buf(&mut buf).await?;
        let next = if n == 0 {
            None
        } else {
            Some((buf.freeze(), reader))
        };
        Ok::<_, Error>(next)
    }))
}

/// Forward-only stream of response bytes
pub struct ByteStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl ByteStream {
    pub fn new(s: impl Stream<Item = Result<Bytes>> + Send + 'static) -> Self {
        Self { inner: s.boxed() }
    }

    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// Buffer the whole stream in memory
    pub async fn collect(self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        let mut inner = self.inner;
        while let Some(chunk) = inner.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Copy the stream into a writer, returning the number of bytes written
    pub async fn write_to<W>(self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        let mut inner = self.inner;
        while let Some(chunk) = inner.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl From<Bytes> for ByteStream {
    fn from(b: Bytes) -> Self {
        if b.is_empty() {
            Self::empty()
        } else {
            Self::new(stream::once(async move { Ok(b) }))
        }
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(v: Vec<u8>) -> Self {
        Self::from(Bytes::from(v))
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_range_body() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789abcdef").unwrap();

        let body = Body::File {
            path: file.path().to_path_buf(),
            offset: 10,
            length: 4,
        };
        assert_eq!(body.content_length(), Some(4));

        // A file body can be opened more than once.
        let first = body.clone().into_stream().await.unwrap().collect().await.unwrap();
        let second = body.into_stream().await.unwrap().collect().await.unwrap();
        assert_eq!(&first[..], b"abcd");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_stream_body_is_single_use() {
        let body = Body::Stream(StreamSource::new(&b"piped input"[..]));
        assert_eq!(body.content_length(), None);

        let data = body.clone().into_stream().await.unwrap().collect().await.unwrap();
        assert_eq!(&data[..], b"piped input");

        let err = body.into_stream().await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_to_counts_bytes() {
        let stream = ByteStream::new(stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"de")),
        ]));
        let mut out = Vec::new();
        let n = stream.write_to(&mut out).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"abcde");
    }
}
