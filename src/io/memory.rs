//! In-memory [`RangeSource`].
//!
//! Serves a byte buffer and keeps counters of the requests made against it,
//! which makes it useful for checking how much of an archive a given
//! operation actually touched.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{RangeBody, RangeSource, check_range};
use crate::error::SourceError;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub struct MemorySource {
    data: Bytes,
    locator: String,
    chunk_size: usize,
    requests: AtomicUsize,
    served: AtomicU64,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            locator: "memory".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            requests: AtomicUsize::new(0),
            served: AtomicU64::new(0),
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = locator.into();
        self
    }

    /// Size of the chunks handed out by opened bodies.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of range requests issued so far (each `read_range` or `open_range` counts once).
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Total bytes served so far.
    pub fn bytes_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.served.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl RangeSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        check_range(offset, len, self.size())?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.served.fetch_add(len, Ordering::Relaxed);
        let start = offset as usize;
        Ok(self.data.slice(start..start + len as usize))
    }

    async fn open_range(&self, offset: u64, len: u64) -> Result<Box<dyn RangeBody>, SourceError> {
        check_range(offset, len, self.size())?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.served.fetch_add(len, Ordering::Relaxed);
        let start = offset as usize;
        Ok(Box::new(MemoryBody {
            remaining: self.data.slice(start..start + len as usize),
            chunk_size: self.chunk_size,
        }))
    }
}

struct MemoryBody {
    remaining: Bytes,
    chunk_size: usize,
}

#[async_trait]
impl RangeBody for MemoryBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        let n = self.chunk_size.min(self.remaining.len());
        Ok(Some(self.remaining.split_to(n)))
    }
}
