//! Building ZIP archives byte by byte for tests.
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

pub const STORED: u16 = 0;
pub const DEFLATE: u16 = 8;

/// One entry to be written by [`ZipBuilder`].
#[derive(Debug, Clone)]
pub struct FixtureEntry {
    pub name: Vec<u8>,
    pub data: Vec<u8>,
    pub method: u16,
    pub flags: u16,
    pub data_descriptor: bool,
    /// Written instead of the real CRC-32 in both headers.
    pub crc_override: Option<u32>,
    /// Written into the local header instead of the entry name.
    pub local_name_override: Option<Vec<u8>>,
    pub extra: Vec<u8>,
}

impl FixtureEntry {
    pub fn stored(name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            data: data.into(),
            method: STORED,
            flags: 0,
            data_descriptor: false,
            crc_override: None,
            local_name_override: None,
            extra: Vec::new(),
        }
    }

    pub fn deflated(name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            method: DEFLATE,
            ..Self::stored(name, data)
        }
    }

    pub fn directory(name: impl AsRef<[u8]>) -> Self {
        Self::stored(name, Vec::new())
    }

    pub fn with_data_descriptor(mut self) -> Self {
        self.data_descriptor = true;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_wrong_crc(mut self, crc: u32) -> Self {
        self.crc_override = Some(crc);
        self
    }

    pub fn with_local_name(mut self, name: impl AsRef<[u8]>) -> Self {
        self.local_name_override = Some(name.as_ref().to_vec());
        self
    }

    /// Append a raw extra field block to the central directory header.
    pub fn with_extra(mut self, id: u16, body: &[u8]) -> Self {
        self.extra.extend_from_slice(&id.to_le_bytes());
        self.extra.extend_from_slice(&(body.len() as u16).to_le_bytes());
        self.extra.extend_from_slice(body);
        self
    }

    fn payload(&self) -> Vec<u8> {
        match self.method {
            DEFLATE => deflate(&self.data),
            _ => self.data.clone(),
        }
    }
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Where each entry ended up in the built archive.
#[derive(Debug, Clone)]
pub struct Layout {
    pub lfh_offsets: Vec<u64>,
    pub cd_offset: u64,
    pub cd_size: u64,
    pub eocd_offset: u64,
}

#[derive(Debug, Default)]
pub struct ZipBuilder {
    entries: Vec<FixtureEntry>,
    comment: Vec<u8>,
    zip64: bool,
    prefix: Vec<u8>,
    trailing: Vec<u8>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: FixtureEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(FixtureEntry::stored(name, data))
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(FixtureEntry::deflated(name, data))
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Write Zip64 records and saturate every 32-bit field.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Bytes placed in front of the first local header.
    pub fn prefix(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.prefix = bytes.into();
        self
    }

    /// Bytes appended after the end record.
    pub fn trailing(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.trailing = bytes.into();
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(self) -> (Vec<u8>, Layout) {
        let mut out = self.prefix.clone();
        let mut central = Vec::new();
        let mut lfh_offsets = Vec::new();

        for entry in &self.entries {
            let payload = entry.payload();
            let crc = entry
                .crc_override
                .unwrap_or_else(|| crc32fast::hash(&entry.data));
            let flags = entry.flags | if entry.data_descriptor { 0x0008 } else { 0 };
            let offset = out.len() as u64;
            lfh_offsets.push(offset);

            let local_name = entry.local_name_override.as_ref().unwrap_or(&entry.name);
            let (lfh_crc, lfh_csize, lfh_usize) = if entry.data_descriptor {
                (0, 0, 0)
            } else if self.zip64 {
                (crc, u32::MAX, u32::MAX)
            } else {
                (crc, payload.len() as u32, entry.data.len() as u32)
            };
            let lfh_extra = if self.zip64 && !entry.data_descriptor {
                let mut extra = Vec::new();
                extra.extend_from_slice(&1u16.to_le_bytes());
                extra.extend_from_slice(&16u16.to_le_bytes());
                extra.extend_from_slice(&(entry.data.len() as u64).to_le_bytes());
                extra.extend_from_slice(&(payload.len() as u64).to_le_bytes());
                extra
            } else {
                Vec::new()
            };

            put32(&mut out, 0x04034b50);
            put16(&mut out, if self.zip64 { 45 } else { 20 });
            put16(&mut out, flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0x6000); // 12:00
            put16(&mut out, 0x5021); // 2020-01-01
            put32(&mut out, lfh_crc);
            put32(&mut out, lfh_csize);
            put32(&mut out, lfh_usize);
            put16(&mut out, local_name.len() as u16);
            put16(&mut out, lfh_extra.len() as u16);
            out.extend_from_slice(local_name);
            out.extend_from_slice(&lfh_extra);
            out.extend_from_slice(&payload);

            if entry.data_descriptor {
                put32(&mut out, 0x08074b50);
                put32(&mut out, crc);
                put32(&mut out, payload.len() as u32);
                put32(&mut out, entry.data.len() as u32);
            }

            let mut extra = Vec::new();
            let (cd_csize, cd_usize, cd_offset) = if self.zip64 {
                extra.extend_from_slice(&1u16.to_le_bytes());
                extra.extend_from_slice(&24u16.to_le_bytes());
                extra.extend_from_slice(&(entry.data.len() as u64).to_le_bytes());
                extra.extend_from_slice(&(payload.len() as u64).to_le_bytes());
                extra.extend_from_slice(&offset.to_le_bytes());
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (payload.len() as u32, entry.data.len() as u32, offset as u32)
            };
            extra.extend_from_slice(&entry.extra);

            put32(&mut central, 0x02014b50);
            put16(&mut central, 0x0314); // Unix, 2.0
            put16(&mut central, if self.zip64 { 45 } else { 20 });
            put16(&mut central, flags);
            put16(&mut central, entry.method);
            put16(&mut central, 0x6000);
            put16(&mut central, 0x5021);
            put32(&mut central, crc);
            put32(&mut central, cd_csize);
            put32(&mut central, cd_usize);
            put16(&mut central, entry.name.len() as u16);
            put16(&mut central, extra.len() as u16);
            put16(&mut central, 0); // comment
            put16(&mut central, 0); // disk
            put16(&mut central, 0); // internal attributes
            put32(&mut central, 0o100644 << 16);
            put32(&mut central, cd_offset);
            central.extend_from_slice(&entry.name);
            central.extend_from_slice(&extra);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        out.extend_from_slice(&central);
        let count = self.entries.len() as u64;

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            put32(&mut out, 0x06064b50);
            out.extend_from_slice(&44u64.to_le_bytes());
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(&cd_size.to_le_bytes());
            out.extend_from_slice(&cd_offset.to_le_bytes());

            put32(&mut out, 0x07064b50);
            put32(&mut out, 0);
            out.extend_from_slice(&eocd64_offset.to_le_bytes());
            put32(&mut out, 1);
        }

        let eocd_offset = out.len() as u64;
        put32(&mut out, 0x06054b50);
        put16(&mut out, 0);
        put16(&mut out, 0);
        if self.zip64 {
            put16(&mut out, u16::MAX);
            put16(&mut out, u16::MAX);
            put32(&mut out, u32::MAX);
            put32(&mut out, u32::MAX);
        } else {
            put16(&mut out, count as u16);
            put16(&mut out, count as u16);
            put32(&mut out, cd_size as u32);
            put32(&mut out, cd_offset as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out.extend_from_slice(&self.trailing);

        (
            out,
            Layout {
                lfh_offsets,
                cd_offset,
                cd_size,
                eocd_offset,
            },
        )
    }
}

fn put16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Seeded pseudorandom payload drawn from a small alphabet, so it compresses.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.u8(b'a'..=b'h')).collect()
}

/// Archive written by the `zip` crate, for cross-checking.
pub fn zip_crate_archive(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    use zip::write::FileOptions;
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data, deflated) in files {
        let method = if *deflated {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        writer
            .start_file(*name, FileOptions::default().compression_method(method))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Contents of every file in `archive`, decompressed by the `zip` crate.
pub fn zip_crate_read_all(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;
    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
    let mut files = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        files.push((file.name().to_string(), data));
    }
    files
}
