//! Random-access byte sources.
//!
//! Everything the ZIP layer reads goes through [`RangeSource`]: a blob of known
//! size that can serve arbitrary `[offset, offset + len)` ranges, either all
//! at once ([`RangeSource::read_range`]) or incrementally as a
//! [`RangeBody`] ([`RangeSource::open_range`]). Retry policy lives in the
//! implementations, never in the callers.

mod http;
mod local;
pub mod memory;
pub mod s3;

pub use http::{HttpRangeReader, RequestSigner};
pub use local::LocalFileReader;
pub use memory::MemorySource;
pub use s3::{S3Location, S3Signer};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::SourceError;

/// Trait for random access reading from a data source
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Total size of the data source in bytes.
    fn size(&self) -> u64;

    /// Human readable locator used in error messages (`s3://bucket/key`, a URL or a path).
    fn locator(&self) -> &str;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`SourceError::ShortRead`] if the range extends past the end
    /// of the object or the backing store returns fewer bytes.
    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        let mut body = self.open_range(offset, len).await?;
        let mut buf = BytesMut::with_capacity(len as usize);
        while let Some(chunk) = body.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        if buf.len() as u64 != len {
            return Err(SourceError::ShortRead {
                offset,
                wanted: len,
                got: buf.len() as u64,
            });
        }
        Ok(buf.freeze())
    }

    /// Open `[offset, offset + len)` for incremental consumption.
    async fn open_range(&self, offset: u64, len: u64) -> Result<Box<dyn RangeBody>, SourceError>;
}

/// A single-pass sequence of chunks covering one opened range.
///
/// Chunks arrive in order and together cover the range exactly. Once
/// `Ok(None)` is returned the body is exhausted; a body cannot be rewound.
#[async_trait]
pub trait RangeBody: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError>;
}

/// Reject ranges that do not fit inside an object of `size` bytes.
pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<(), SourceError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SourceError::ShortRead {
            offset,
            wanted: len,
            got: size.saturating_sub(offset).min(len),
        }),
    }
}
