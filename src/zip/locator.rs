//! Locating and parsing the central directory.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) record in the archive's tail
//! 2. If ZIP64, read the ZIP64 EOCD for the 64-bit offsets and counts
//! 3. Read the Central Directory in one range request and parse every entry
//!
//! For an ordinary archive this costs two range reads (one when the whole
//! directory already sits inside the tail window), whatever the archive size.

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Bytes, BytesMut};
use std::io::{Cursor, Read};
use tracing::{debug, trace, warn};

use super::structures::*;
use crate::config::LocatorOptions;
use crate::error::{Error, Result};
use crate::io::RangeSource;

/// The parsed directory: where it was found and every entry in directory order.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    pub eocd: EndOfCentralDirectory,
    pub entries: Vec<CentralDirectoryEntry>,
}

/// How strictly a candidate EOCD record must agree with its surroundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consistency {
    /// Comment runs exactly to the end of the archive and the directory ends
    /// exactly where the record starts.
    Exact,
    /// Comment runs exactly to the end; the directory lies before the record.
    Comment,
    /// Comment fits in the window (data may trail the archive); the directory
    /// lies before the record.
    Bounded,
}

/// The tail window that contained the EOCD record.
struct Tail {
    data: Bytes,
    /// Absolute offset of `data[0]`.
    start: u64,
    /// Index of the record signature within `data`.
    pos: usize,
    record: EocdRecord,
}

impl Tail {
    fn record_offset(&self) -> u64 {
        self.start + self.pos as u64
    }

    /// The bytes of `[offset, offset + len)` if the window covers them.
    fn slice(&self, offset: u64, len: u64) -> Option<Bytes> {
        let begin = offset.checked_sub(self.start)?;
        let end = begin.checked_add(len)?;
        (end <= self.data.len() as u64).then(|| self.data.slice(begin as usize..end as usize))
    }
}

/// Finds the EOCD record and reads the entry table from a [`RangeSource`].
pub struct CentralDirectoryLocator<'a, R: RangeSource + ?Sized> {
    source: &'a R,
    size: u64,
    options: LocatorOptions,
}

impl<'a, R: RangeSource + ?Sized> CentralDirectoryLocator<'a, R> {
    pub fn new(source: &'a R) -> Self {
        Self {
            size: source.size(),
            source,
            options: LocatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LocatorOptions) -> Self {
        self.options = options;
        self
    }

    fn locator(&self) -> &str {
        self.source.locator()
    }

    async fn read(&self, offset: u64, len: u64) -> Result<Bytes> {
        self.source
            .read_range(offset, len)
            .await
            .map_err(|e| Error::transport(self.locator(), e))
    }

    /// Locate the EOCD record and parse the whole central directory.
    pub async fn locate(&self) -> Result<CentralDirectory> {
        let tail = self.find_eocd().await?;
        let eocd = self.resolve(&tail).await?;
        debug!(
            entries = eocd.entry_count,
            offset = eocd.directory_offset,
            size = eocd.directory_size,
            zip64 = eocd.zip64,
            "central directory located"
        );

        let data = match tail.slice(eocd.directory_offset, eocd.directory_size) {
            Some(data) => data,
            None => self.read(eocd.directory_offset, eocd.directory_size).await?,
        };
        let entries = parse_directory(&data, eocd.entry_count, self.size, self.locator())?;

        Ok(CentralDirectory { eocd, entries })
    }

    /// Read growing windows from the end of the archive until one contains a
    /// consistent EOCD record.
    async fn find_eocd(&self) -> Result<Tail> {
        if self.size < EocdRecord::SIZE as u64 {
            return Err(Error::not_a_zip(
                self.locator(),
                format!("only {} bytes long", self.size),
            ));
        }

        let max_window = self.options.max_window.max(EocdRecord::SIZE as u64).min(self.size);
        let mut window = self
            .options
            .initial_window
            .max(EocdRecord::SIZE as u64)
            .min(max_window);
        let mut data = self.read(self.size - window, window).await?;

        loop {
            let start = self.size - window;
            debug!(window, start, "scanning for end of central directory");

            for level in [Consistency::Exact, Consistency::Comment, Consistency::Bounded] {
                if let Some((pos, record)) = scan_for_eocd(&data, start, level) {
                    debug!(offset = start + pos as u64, ?level, "found end of central directory");
                    return Ok(Tail {
                        data,
                        start,
                        pos,
                        record,
                    });
                }
            }

            if window >= max_window {
                return Err(Error::not_a_zip(
                    self.locator(),
                    format!("no end of central directory record in the last {window} bytes"),
                ));
            }

            // Only fetch the part in front of what we already have.
            let next = window.saturating_mul(2).min(max_window);
            let front = self.read(self.size - next, next - window).await?;
            let mut grown = BytesMut::with_capacity(next as usize);
            grown.extend_from_slice(&front);
            grown.extend_from_slice(&data);
            data = grown.freeze();
            window = next;
        }
    }

    /// Turn the classic record into directory coordinates, following the
    /// Zip64 records when the classic fields are saturated.
    async fn resolve(&self, tail: &Tail) -> Result<EndOfCentralDirectory> {
        let record = &tail.record;
        let record_offset = tail.record_offset();
        let comment_start = tail.pos + EocdRecord::SIZE;
        let comment_end = (comment_start + record.comment_len as usize).min(tail.data.len());
        let comment = tail.data[comment_start..comment_end].to_vec();

        let zip64 = if record.is_zip64() {
            self.read_zip64(tail).await?
        } else {
            None
        };

        let (entry_count, directory_size, directory_offset) = match &zip64 {
            Some(z) => {
                if z.disk_number != z.disk_with_cd || z.disk_entries != z.total_entries {
                    return Err(self.multi_disk());
                }
                (z.total_entries, z.cd_size, z.cd_offset)
            }
            None => {
                if record.disk_number != record.disk_with_cd
                    || record.disk_entries != record.total_entries
                {
                    return Err(self.multi_disk());
                }
                (
                    record.total_entries as u64,
                    record.cd_size as u64,
                    record.cd_offset as u64,
                )
            }
        };

        match directory_offset.checked_add(directory_size) {
            Some(end) if end <= record_offset => {}
            _ => {
                return Err(Error::not_a_zip(
                    self.locator(),
                    format!(
                        "central directory ({directory_offset} + {directory_size}) \
                         overlaps the end record at {record_offset}"
                    ),
                ));
            }
        }

        Ok(EndOfCentralDirectory {
            entry_count,
            directory_size,
            directory_offset,
            comment,
            record_offset,
            zip64: zip64.is_some(),
        })
    }

    /// Find the Zip64 locator in front of the classic record and read the
    /// Zip64 EOCD record it points to.
    ///
    /// Returns `None` when there is no locator: some writers store exactly
    /// 65535 entries without Zip64, and the classic fields are then used as-is.
    async fn read_zip64(&self, tail: &Tail) -> Result<Option<Zip64EocdRecord>> {
        let record_offset = tail.record_offset();
        let Some(locator_offset) = record_offset.checked_sub(Zip64EocdLocator::SIZE as u64) else {
            return Ok(None);
        };

        let bytes = match tail.slice(locator_offset, Zip64EocdLocator::SIZE as u64) {
            Some(bytes) => bytes,
            None => self.read(locator_offset, Zip64EocdLocator::SIZE as u64).await?,
        };
        let locator = Zip64EocdLocator::from_bytes(&bytes).or_else(|| {
            // Not directly in front: search backwards through the window.
            let before = &tail.data[..tail.pos];
            (0..before.len().saturating_sub(Zip64EocdLocator::SIZE - 1))
                .rev()
                .find_map(|i| Zip64EocdLocator::from_bytes(&before[i..]))
        });

        let Some(locator) = locator else {
            warn!(
                "{}: end record has Zip64 markers but no Zip64 locator, using 32-bit fields",
                self.locator()
            );
            return Ok(None);
        };
        trace!(?locator, "zip64 end of central directory locator");

        if locator.total_disks > 1 {
            return Err(self.multi_disk());
        }

        let offset = locator.eocd64_offset;
        let size = Zip64EocdRecord::MIN_SIZE as u64;
        if offset.checked_add(size).is_none_or(|end| end > record_offset) {
            return Err(Error::not_a_zip(
                self.locator(),
                format!("Zip64 end record offset {offset} is out of range"),
            ));
        }
        let bytes = match tail.slice(offset, size) {
            Some(bytes) => bytes,
            None => self.read(offset, size).await?,
        };
        let record = Zip64EocdRecord::from_bytes(&bytes).ok_or_else(|| {
            Error::not_a_zip(self.locator(), "invalid Zip64 end of central directory record")
        })?;
        debug!(?record, "zip64 end of central directory");
        Ok(Some(record))
    }

    fn multi_disk(&self) -> Error {
        Error::UnsupportedFeature {
            subject: self.locator().to_string(),
            feature: "multi-disk archive".to_string(),
        }
    }
}

/// Scan `window` backwards for the last EOCD signature that satisfies `level`.
fn scan_for_eocd(window: &[u8], window_start: u64, level: Consistency) -> Option<(usize, EocdRecord)> {
    if window.len() < EocdRecord::SIZE {
        return None;
    }
    for i in (0..=window.len() - EocdRecord::SIZE).rev() {
        if &window[i..i + 4] != EocdRecord::SIGNATURE {
            continue;
        }
        let Some(record) = EocdRecord::from_bytes(&window[i..]) else {
            continue;
        };
        let comment_end = i + EocdRecord::SIZE + record.comment_len as usize;
        let record_offset = window_start + i as u64;
        let directory_end = record.cd_offset as u64 + record.cd_size as u64;

        let accepted = match level {
            Consistency::Exact => {
                comment_end == window.len() && (record.is_zip64() || directory_end == record_offset)
            }
            Consistency::Comment => {
                comment_end == window.len() && (record.is_zip64() || directory_end <= record_offset)
            }
            Consistency::Bounded => {
                comment_end <= window.len() && (record.is_zip64() || directory_end <= record_offset)
            }
        };
        if accepted {
            return Some((i, record));
        }
        trace!(offset = record_offset, ?level, "rejected end of central directory candidate");
    }
    None
}

/// Parse `count` consecutive central directory headers from `data`.
pub fn parse_directory(
    data: &[u8],
    count: u64,
    archive_size: u64,
    locator: &str,
) -> Result<Vec<CentralDirectoryEntry>> {
    let capacity = count.min((data.len() / CDFH_MIN_SIZE) as u64) as usize;
    let mut entries = Vec::with_capacity(capacity);
    let mut cursor = Cursor::new(data);

    for index in 0..count {
        if cursor.position() as usize >= data.len() {
            return Err(Error::truncated(
                locator,
                format!("expected {count} entries, directory ends after {index}"),
            ));
        }
        let entry = parse_cdfh(&mut cursor)
            .map_err(|reason| Error::truncated(locator, format!("entry {index}: {reason}")))?;
        if entry.lfh_offset >= archive_size {
            return Err(Error::truncated(
                locator,
                format!(
                    "entry {index} ({}) points past the end of the archive",
                    entry.file_name
                ),
            ));
        }
        entries.push(entry);
    }

    let trailing = data.len() as u64 - cursor.position();
    if trailing > 0 {
        trace!(trailing, "bytes after the last central directory entry");
    }
    Ok(entries)
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> std::result::Result<CentralDirectoryEntry, String> {
    let data = *cursor.get_ref();
    let start = cursor.position() as usize;
    if data.len() - start < CDFH_MIN_SIZE {
        return Err("header is cut short".to_string());
    }
    let short = |_| "header is cut short".to_string();

    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(short)?;
    if sig != CDFH_SIGNATURE {
        return Err("invalid central directory header signature".to_string());
    }

    // Read fixed-size header fields
    let version_made_by = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let version_needed = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let flags = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let compression_method = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let last_mod_time = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let last_mod_date = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let crc32 = cursor.read_u32::<LittleEndian>().map_err(short)?;
    let compressed_size = cursor.read_u32::<LittleEndian>().map_err(short)?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(short)?;
    let file_name_length = cursor.read_u16::<LittleEndian>().map_err(short)? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(short)? as usize;
    let file_comment_length = cursor.read_u16::<LittleEndian>().map_err(short)? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let internal_attributes = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let external_attributes = cursor.read_u32::<LittleEndian>().map_err(short)?;
    let lfh_offset = cursor.read_u32::<LittleEndian>().map_err(short)?;

    let name_start = start + CDFH_MIN_SIZE;
    let extra_start = name_start + file_name_length;
    let end = extra_start + extra_field_length + file_comment_length;
    if end > data.len() {
        return Err("name, extra field or comment runs past the directory".to_string());
    }
    let raw_name = data[name_start..extra_start].to_vec();
    let extra = &data[extra_start..extra_start + extra_field_length];
    cursor.set_position(end as u64);

    let file_name = decode_name(&raw_name, flags & flags::UTF8_NAME != 0);
    let is_directory = file_name.ends_with('/');

    let mut unsupported = None;
    if flags & flags::STRONG_ENCRYPTION != 0 {
        unsupported = Some("strong encryption");
    } else if flags & flags::ENCRYPTED != 0 {
        unsupported = Some("encryption");
    }

    let mut entry = CentralDirectoryEntry {
        raw_name,
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size: compressed_size as u64,
        uncompressed_size: uncompressed_size as u64,
        crc32,
        lfh_offset: lfh_offset as u64,
        flags,
        version_made_by,
        version_needed,
        internal_attributes,
        external_attributes,
        last_mod_time,
        last_mod_date,
        unix_mtime: None,
        unix_uid: None,
        unix_gid: None,
        is_directory,
        unsupported,
    };
    apply_extra_fields(&mut entry, extra, compressed_size, uncompressed_size, lfh_offset);
    Ok(entry)
}

/// Walk the extra field blocks, filling in Zip64 values and the optional
/// Unix metadata. Malformed blocks end the walk rather than fail the entry.
fn apply_extra_fields(
    entry: &mut CentralDirectoryEntry,
    extra: &[u8],
    compressed_size: u32,
    uncompressed_size: u32,
    lfh_offset: u32,
) {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let Some(body) = extra.get(pos + 4..pos + 4 + size) else {
            trace!(id, "extra field runs past its container");
            break;
        };
        let mut cursor = Cursor::new(body);

        match id {
            extra_id::ZIP64 => {
                // Fields are present only if the corresponding header field is 0xFFFFFFFF
                if uncompressed_size == U32_SENTINEL {
                    if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                        entry.uncompressed_size = v;
                    }
                }
                if compressed_size == U32_SENTINEL {
                    if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                        entry.compressed_size = v;
                    }
                }
                if lfh_offset == U32_SENTINEL {
                    if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                        entry.lfh_offset = v;
                    }
                }
            }
            extra_id::EXTENDED_TIMESTAMP => {
                // The central directory copy carries at most the modification time.
                let flags = cursor.read_u8().unwrap_or(0);
                if flags & 0x01 != 0 {
                    entry.unix_mtime = cursor.read_u32::<LittleEndian>().ok();
                }
            }
            extra_id::UNIX_UID_GID => {
                if cursor.read_u8().ok() == Some(1) {
                    entry.unix_uid = read_var_uint(&mut cursor);
                    entry.unix_gid = read_var_uint(&mut cursor);
                }
            }
            extra_id::STRONG_ENCRYPTION => entry.unsupported = Some("strong encryption"),
            extra_id::AES => entry.unsupported = Some("AES encryption"),
            other => trace!(id = other, size, "skipping extra field"),
        }

        pos += 4 + size;
    }
}

/// A length-prefixed little-endian integer of up to four bytes.
fn read_var_uint(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let len = cursor.read_u8().ok()? as usize;
    if len > 4 {
        return None;
    }
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf[..len]).ok()?;
    Some(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut buf = b"PK\x05\x06\0\0\0\0".to_vec();
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        buf.extend_from_slice(comment);
        buf
    }

    fn cdfh(name: &[u8], extra: &[u8], sizes: u32, offset: u32) -> Vec<u8> {
        let mut buf = b"PK\x01\x02".to_vec();
        buf.extend_from_slice(&[20, 3, 20, 0]); // made by, needed
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // method
        buf.extend_from_slice(&[0; 4]); // time, date
        buf.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        buf.extend_from_slice(&sizes.to_le_bytes());
        buf.extend_from_slice(&sizes.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // comment
        buf.extend_from_slice(&[0; 8]); // disk, attrs
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(extra);
        buf
    }

    #[test]
    fn exact_consistency_prefers_the_record_that_closes_the_directory() {
        // Directory of 46 bytes at offset 100; the real record sits at 146.
        // Its comment holds a fake record that also reaches the window end.
        let fake = eocd(1, 10, 0, b"");
        let mut window = vec![0u8; 146];
        window.extend_from_slice(&eocd(1, 46, 100, &fake));

        let (pos, record) = scan_for_eocd(&window, 0, Consistency::Exact).unwrap();
        assert_eq!(pos, 146);
        assert_eq!(record.cd_offset, 100);

        // The relaxed level takes the later (fake) candidate.
        let (pos, _) = scan_for_eocd(&window, 0, Consistency::Comment).unwrap();
        assert_eq!(pos, 146 + 22);
    }

    #[test]
    fn bounded_consistency_tolerates_trailing_bytes() {
        let mut window = vec![0u8; 50];
        window.extend_from_slice(&eocd(0, 0, 50, b""));
        window.extend_from_slice(b"trailing junk");
        assert!(scan_for_eocd(&window, 0, Consistency::Comment).is_none());
        let (pos, _) = scan_for_eocd(&window, 0, Consistency::Bounded).unwrap();
        assert_eq!(pos, 50);
    }

    #[test]
    fn parses_entries_with_zip64_and_unix_extra_fields() {
        let mut extra = Vec::new();
        // Zip64: uncompressed, compressed, offset
        extra.extend_from_slice(&extra_id::ZIP64.to_le_bytes());
        extra.extend_from_slice(&24u16.to_le_bytes());
        extra.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&4_999_999_999u64.to_le_bytes());
        extra.extend_from_slice(&7u64.to_le_bytes());
        // Extended timestamp with mtime
        extra.extend_from_slice(&extra_id::EXTENDED_TIMESTAMP.to_le_bytes());
        extra.extend_from_slice(&5u16.to_le_bytes());
        extra.push(1);
        extra.extend_from_slice(&1_704_027_060u32.to_le_bytes());
        // uid/gid, version 1, 4-byte ids
        extra.extend_from_slice(&extra_id::UNIX_UID_GID.to_le_bytes());
        extra.extend_from_slice(&11u16.to_le_bytes());
        extra.extend_from_slice(&[1, 4]);
        extra.extend_from_slice(&1000u32.to_le_bytes());
        extra.push(4);
        extra.extend_from_slice(&100u32.to_le_bytes());

        let mut directory = cdfh(b"big.bin", &extra, U32_SENTINEL, U32_SENTINEL);
        directory.extend_from_slice(&cdfh(b"dir/", &[], 0, 0));

        let entries = parse_directory(&directory, 2, 10_000_000_000, "test.zip").unwrap();
        assert_eq!(entries.len(), 2);
        let big = &entries[0];
        assert_eq!(big.file_name, "big.bin");
        assert_eq!(big.uncompressed_size, 5_000_000_000);
        assert_eq!(big.compressed_size, 4_999_999_999);
        assert_eq!(big.lfh_offset, 7);
        assert_eq!(big.crc32, 0x1234_5678);
        assert_eq!(big.unix_mtime, Some(1_704_027_060));
        assert_eq!((big.unix_uid, big.unix_gid), (Some(1000), Some(100)));
        assert_eq!(big.unsupported, None);
        assert!(entries[1].is_directory);
    }

    #[test]
    fn count_beyond_the_buffer_is_a_truncated_directory() {
        let directory = cdfh(b"a.txt", &[], 1, 0);
        let err = parse_directory(&directory, 2, 1000, "test.zip").unwrap_err();
        assert!(matches!(err, Error::TruncatedDirectory { .. }), "{err}");

        let err = parse_directory(&directory[..50], 1, 1000, "test.zip").unwrap_err();
        assert!(matches!(err, Error::TruncatedDirectory { .. }), "{err}");
    }

    #[test]
    fn offsets_past_the_archive_are_rejected() {
        let directory = cdfh(b"a.txt", &[], 1, 5000);
        let err = parse_directory(&directory, 1, 1000, "test.zip").unwrap_err();
        assert!(err.to_string().contains("points past the end"), "{err}");
    }

    #[test]
    fn encryption_marks_entries_unsupported() {
        let mut extra = extra_id::AES.to_le_bytes().to_vec();
        extra.extend_from_slice(&7u16.to_le_bytes());
        extra.extend_from_slice(&[2, 0, b'A', b'E', 3, 8, 0]);
        let directory = cdfh(b"secret.txt", &extra, 1, 0);
        let entries = parse_directory(&directory, 1, 1000, "test.zip").unwrap();
        assert_eq!(entries[0].unsupported, Some("AES encryption"));
    }
}
