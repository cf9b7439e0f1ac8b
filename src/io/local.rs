use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::{RangeBody, RangeSource, check_range};
use crate::error::SourceError;

const CHUNK_SIZE: u64 = 256 * 1024;

/// Local file reader with random access support
pub struct LocalFileReader {
    file: Arc<File>,
    size: u64,
    locator: String,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            size,
            locator: path.display().to_string(),
        })
    }
}

#[async_trait]
impl RangeSource for LocalFileReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    async fn read_range(&self, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        check_range(offset, len, self.size)?;
        let mut buf = vec![0u8; len as usize];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf.into())
    }

    async fn open_range(&self, offset: u64, len: u64) -> Result<Box<dyn RangeBody>, SourceError> {
        check_range(offset, len, self.size)?;
        Ok(Box::new(LocalBody {
            file: Arc::clone(&self.file),
            position: offset,
            end: offset + len,
        }))
    }
}

struct LocalBody {
    file: Arc<File>,
    position: u64,
    end: u64,
}

#[async_trait]
impl RangeBody for LocalBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        if self.position >= self.end {
            return Ok(None);
        }
        let n = (self.end - self.position).min(CHUNK_SIZE);
        let mut buf = vec![0u8; n as usize];
        read_exact_at(&self.file, &mut buf, self.position)?;
        self.position += n;
        Ok(Some(buf.into()))
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
