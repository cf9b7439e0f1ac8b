//! Streaming one entry's data out of the archive.
//!
//! An [`EntryStreamer`] re-reads the entry's local file header, checks it
//! against the central directory, then opens a single range over the
//! compressed bytes and inflates them chunk by chunk as they arrive. The
//! stream is pull-based and single-pass: each call to
//! [`EntryStreamer::next_chunk`] yields the next piece of output.

use bytes::{Buf, Bytes};
use flate2::{Decompress, FlushDecompress, Status};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::structures::*;
use crate::error::{Error, Result};
use crate::io::{RangeBody, RangeSource};

/// Local header bytes fetched up front: fixed part plus room for typical
/// name and extra field lengths.
pub const LOCAL_HEADER_WINDOW: u64 = 4096;

/// Largest chunk [`EntryStreamer::next_chunk`] hands out.
pub const MAX_CHUNK: usize = 64 * 1024;

/// Signature, CRC-32 and two 8-byte sizes.
const MAX_DATA_DESCRIPTOR: u64 = 24;

/// Lifecycle of a streamer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeaderFetched,
    Streaming,
    Done,
    Failed,
}

enum Decoder {
    Stored,
    Deflate { inflater: Box<Decompress>, finished: bool },
}

struct Flow {
    body: Box<dyn RangeBody>,
    /// Input received but not yet consumed.
    pending: Bytes,
    input_done: bool,
    decoder: Decoder,
    hasher: crc32fast::Hasher,
    produced: u64,
    /// End of the compressed data.
    payload_end: u64,
}

enum State {
    Idle,
    HeaderFetched { payload_start: u64 },
    Streaming(Box<Flow>),
    Done,
    Failed,
}

pub struct EntryStreamer<R: RangeSource + ?Sized> {
    source: Arc<R>,
    entry: CentralDirectoryEntry,
    state: State,
    header: Option<LocalFileHeader>,
}

impl<R: RangeSource + ?Sized> EntryStreamer<R> {
    pub fn new(source: Arc<R>, entry: CentralDirectoryEntry) -> Self {
        Self {
            source,
            entry,
            state: State::Idle,
            header: None,
        }
    }

    pub fn entry(&self) -> &CentralDirectoryEntry {
        &self.entry
    }

    pub fn state(&self) -> StreamState {
        match self.state {
            State::Idle => StreamState::Idle,
            State::HeaderFetched { .. } => StreamState::HeaderFetched,
            State::Streaming(_) => StreamState::Streaming,
            State::Done => StreamState::Done,
            State::Failed => StreamState::Failed,
        }
    }

    /// The local header, once fetched.
    pub fn local_header(&self) -> Option<&LocalFileHeader> {
        self.header.as_ref()
    }

    fn name(&self) -> &str {
        &self.entry.file_name
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::corrupt(self.name(), reason)
    }

    /// Fetch and validate the local file header (`Idle -> HeaderFetched`).
    ///
    /// Calling this again after the header is fetched is a no-op.
    pub async fn fetch_header(&mut self) -> Result<&LocalFileHeader> {
        if matches!(self.state, State::Idle) {
            let view = EntryView {
                source: &*self.source,
                entry: &self.entry,
            };
            let fetched = view.read_header().await;
            match fetched {
                Ok((header, payload_start)) => {
                    self.header = Some(header);
                    self.state = State::HeaderFetched { payload_start };
                }
                Err(e) => {
                    self.state = State::Failed;
                    return Err(e);
                }
            }
        }
        self.header
            .as_ref()
            .ok_or_else(|| self.corrupt("local header is not available in this state"))
    }

    /// Produce the next chunk of uncompressed output.
    ///
    /// Returns `Ok(None)` once all output has been produced and verified.
    /// A [`Error::CrcMismatch`] is returned in place of that final `None` when
    /// the data did not check out; every byte has been handed out by then.
    /// After `Done` or `Failed` this keeps returning `Ok(None)`.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            match &mut self.state {
                State::Idle => {
                    self.fetch_header().await?;
                }
                State::HeaderFetched { payload_start } => {
                    let payload_start = *payload_start;
                    let view = EntryView {
                        source: &*self.source,
                        entry: &self.entry,
                    };
                    match view.open(payload_start).await {
                        Ok(flow) => self.state = State::Streaming(Box::new(flow)),
                        Err(e) => {
                            self.state = State::Failed;
                            return Err(e);
                        }
                    }
                }
                State::Streaming(_) => {
                    let result = self.pump().await;
                    match result {
                        Ok(Some(chunk)) => return Ok(Some(chunk)),
                        Ok(None) => {
                            let verdict = self.finish().await;
                            self.state = if verdict.is_ok() {
                                State::Done
                            } else {
                                State::Failed
                            };
                            return verdict.map(|()| None);
                        }
                        Err(e) => {
                            self.state = State::Failed;
                            return Err(e);
                        }
                    }
                }
                State::Done | State::Failed => return Ok(None),
            }
        }
    }

    /// Pull input until some output is available or the input is exhausted.
    /// At most [`MAX_CHUNK`] bytes are produced per call.
    async fn pump(&mut self) -> Result<Option<Bytes>> {
        let State::Streaming(flow) = &mut self.state else {
            return Ok(None);
        };
        let name = &self.entry.file_name;
        let limit = self.entry.uncompressed_size;

        loop {
            if flow.pending.is_empty() && !flow.input_done {
                match flow.body.next_chunk().await.map_err(|e| Error::source(name, e))? {
                    Some(input) => flow.pending = input,
                    None => flow.input_done = true,
                }
            }

            let output = match &mut flow.decoder {
                Decoder::Stored => {
                    if flow.pending.is_empty() {
                        if flow.input_done {
                            return Ok(None);
                        }
                        continue;
                    }
                    let take = flow.pending.len().min(MAX_CHUNK);
                    flow.pending.split_to(take)
                }
                Decoder::Deflate { inflater, finished } => {
                    if *finished {
                        if !flow.pending.is_empty() {
                            trace!(name = %name, "ignoring data after the end of the deflate stream");
                            flow.pending.clear();
                        }
                        if flow.input_done {
                            return Ok(None);
                        }
                        continue;
                    }
                    // One byte past the declared size is enough to catch overproduction.
                    let room = limit
                        .saturating_sub(flow.produced)
                        .saturating_add(1)
                        .min(MAX_CHUNK as u64) as usize;
                    let mut out = vec![0u8; room];
                    let step = inflate(inflater, &flow.pending, &mut out)
                        .map_err(|e| Error::corrupt(name, e))?;
                    flow.pending.advance(step.consumed);
                    *finished = step.finished;

                    if step.written == 0 {
                        if step.finished {
                            continue;
                        }
                        if flow.input_done && flow.pending.is_empty() {
                            return Err(Error::corrupt(name, "deflate stream is incomplete"));
                        }
                        if step.consumed == 0 && !flow.pending.is_empty() {
                            return Err(Error::corrupt(name, "deflate stream makes no progress"));
                        }
                        continue;
                    }
                    out.truncate(step.written);
                    Bytes::from(out)
                }
            };

            flow.produced += output.len() as u64;
            if flow.produced > limit {
                return Err(Error::corrupt(
                    name,
                    format!("inflates past its declared size of {limit} bytes"),
                ));
            }
            flow.hasher.update(&output);
            return Ok(Some(output));
        }
    }

    /// Check sizes and CRC once the input is exhausted (`Streaming -> Done`).
    async fn finish(&mut self) -> Result<()> {
        let State::Streaming(flow) = &mut self.state else {
            return Ok(());
        };
        let produced = flow.produced;
        let actual = std::mem::take(&mut flow.hasher).finalize();
        let payload_end = flow.payload_end;

        if self.entry.has_data_descriptor() {
            // Read and discard: the central directory values are authoritative.
            let len = MAX_DATA_DESCRIPTOR.min(self.source.size().saturating_sub(payload_end));
            match self.source.read_range(payload_end, len).await {
                Ok(_) => trace!(name = self.name(), len, "skipped data descriptor"),
                Err(e) => warn!("{}: could not read data descriptor: {}", self.name(), e),
            }
        }

        if produced != self.entry.uncompressed_size {
            return Err(self.corrupt(format!(
                "produced {produced} bytes, expected {}",
                self.entry.uncompressed_size
            )));
        }
        if actual != self.entry.crc32 {
            return Err(Error::CrcMismatch {
                name: self.name().to_string(),
                expected: self.entry.crc32,
                actual,
            });
        }
        debug!(name = self.name(), bytes = produced, "entry complete");
        Ok(())
    }
}

/// The parts of a streamer that header and range requests need.
struct EntryView<'a, R: ?Sized> {
    source: &'a R,
    entry: &'a CentralDirectoryEntry,
}

impl<R: RangeSource + ?Sized> EntryView<'_, R> {
    fn name(&self) -> &str {
        &self.entry.file_name
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::corrupt(self.name(), reason)
    }

    async fn read_header(&self) -> Result<(LocalFileHeader, u64)> {
        if let Some(feature) = self.entry.unsupported {
            return Err(Error::UnsupportedFeature {
                subject: self.name().to_string(),
                feature: feature.to_string(),
            });
        }
        if let CompressionMethod::Unknown(method) = self.entry.compression_method {
            return Err(Error::UnsupportedFeature {
                subject: self.name().to_string(),
                feature: format!(
                    "compression method {} ({method})",
                    self.entry.compression_method.label()
                ),
            });
        }

        let size = self.source.size();
        let offset = self.entry.lfh_offset;
        let available = size.saturating_sub(offset);
        if available < LFH_SIZE as u64 {
            return Err(self.corrupt(format!("local header at {offset} runs past the archive")));
        }

        let window = self.read(offset, available.min(LOCAL_HEADER_WINDOW)).await?;
        let header = LocalFileHeader::from_bytes(&window)
            .ok_or_else(|| self.corrupt(format!("no local header signature at {offset}")))?;

        let name_end = LFH_SIZE + header.file_name_length as usize;
        let name = if name_end <= window.len() {
            window.slice(LFH_SIZE..name_end)
        } else {
            self.read(offset + LFH_SIZE as u64, header.file_name_length as u64).await?
        };
        if name[..] != self.entry.raw_name[..] {
            return Err(self.corrupt(format!(
                "local header names '{}'",
                decode_name(&name, header.flags & flags::UTF8_NAME != 0)
            )));
        }
        if header.compression_method != self.entry.compression_method {
            return Err(self.corrupt(format!(
                "local header says compression method {}, central directory says {}",
                header.compression_method.as_u16(),
                self.entry.compression_method.as_u16()
            )));
        }

        let payload_start = offset + header.header_len();
        match payload_start.checked_add(self.entry.compressed_size) {
            Some(end) if end <= size => {}
            _ => {
                return Err(self.corrupt(format!(
                    "{} bytes of data at {payload_start} run past the archive",
                    self.entry.compressed_size
                )));
            }
        }

        trace!(name = self.name(), payload_start, "local header validated");
        Ok((header, payload_start))
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Bytes> {
        self.source
            .read_range(offset, len)
            .await
            .map_err(|e| Error::source(self.name(), e))
    }

    /// Open the data range (`HeaderFetched -> Streaming`). Sizes come from the
    /// central directory, which stays reliable when a data descriptor follows.
    async fn open(&self, payload_start: u64) -> Result<Flow> {
        let len = self.entry.compressed_size;
        let body = self
            .source
            .open_range(payload_start, len)
            .await
            .map_err(|e| Error::source(self.name(), e))?;
        let decoder = match self.entry.compression_method {
            CompressionMethod::Stored => {
                if len != self.entry.uncompressed_size {
                    return Err(self.corrupt(format!(
                        "stored entry has compressed size {len} but uncompressed size {}",
                        self.entry.uncompressed_size
                    )));
                }
                Decoder::Stored
            }
            CompressionMethod::Deflate => Decoder::Deflate {
                inflater: Box::new(Decompress::new(false)),
                finished: false,
            },
            CompressionMethod::Unknown(method) => {
                return Err(Error::UnsupportedFeature {
                    subject: self.name().to_string(),
                    feature: format!("compression method {method}"),
                });
            }
        };
        debug!(name = self.name(), payload_start, len, "streaming entry");
        Ok(Flow {
            body,
            pending: Bytes::new(),
            input_done: false,
            decoder,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
            payload_end: payload_start + len,
        })
    }
}

/// Progress of one [`inflate`] call.
#[derive(Debug, Clone, Copy)]
struct Step {
    consumed: usize,
    written: usize,
    finished: bool,
}

/// Feed `input` through the inflater until `out` is full, the end of the
/// deflate stream is reached, or no further progress is possible.
fn inflate(
    inflater: &mut Decompress,
    input: &[u8],
    out: &mut [u8],
) -> std::result::Result<Step, String> {
    let mut step = Step {
        consumed: 0,
        written: 0,
        finished: false,
    };
    loop {
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();

        let status = inflater
            .decompress(
                &input[step.consumed..],
                &mut out[step.written..],
                FlushDecompress::None,
            )
            .map_err(|e| format!("invalid deflate data: {e}"))?;

        let consumed = (inflater.total_in() - before_in) as usize;
        let written = (inflater.total_out() - before_out) as usize;
        step.consumed += consumed;
        step.written += written;

        if status == Status::StreamEnd {
            step.finished = true;
            return Ok(step);
        }
        if step.written == out.len() || (consumed == 0 && written == 0) {
            return Ok(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Inflate `compressed` fed in `split`-sized pieces into `window`-sized outputs.
    fn inflate_all(compressed: &[u8], split: usize, window: usize) -> (Vec<u8>, bool) {
        let mut inflater = Decompress::new(false);
        let mut out = Vec::new();
        let mut buf = vec![0u8; window];
        let mut finished = false;
        let mut pieces = compressed.chunks(split);
        let mut pending: &[u8] = &[];
        loop {
            if pending.is_empty() {
                pending = pieces.next().unwrap_or(&[]);
            }
            let step = inflate(&mut inflater, pending, &mut buf).unwrap();
            assert!(step.written <= window);
            out.extend_from_slice(&buf[..step.written]);
            pending = &pending[step.consumed..];
            if step.finished {
                finished = true;
                break;
            }
            if step.written == 0 && step.consumed == 0 && pending.is_empty() {
                break;
            }
        }
        (out, finished)
    }

    #[test]
    fn inflates_across_arbitrary_input_splits() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let compressed = deflate(&data);

        for split in [1usize, 7, 100, 4096, compressed.len()] {
            for window in [1usize, 1000, MAX_CHUNK] {
                let (out, finished) = inflate_all(&compressed, split, window);
                assert!(finished, "split {split} window {window}");
                assert_eq!(out, data, "split {split} window {window}");
            }
        }
    }

    #[test]
    fn output_stops_when_the_buffer_is_full() {
        let compressed = deflate(&vec![0u8; 1 << 20]);
        let mut inflater = Decompress::new(false);
        let mut buf = vec![0u8; 4096];
        let step = inflate(&mut inflater, &compressed, &mut buf).unwrap();
        assert_eq!(step.written, 4096);
        assert!(!step.finished);
        assert!(step.consumed <= compressed.len());
    }

    #[test]
    fn garbage_is_reported() {
        let mut inflater = Decompress::new(false);
        let mut out = vec![0u8; 1024];
        assert!(inflate(&mut inflater, &[0xff; 64], &mut out).is_err());
    }
}
