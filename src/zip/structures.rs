use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use time::OffsetDateTime;
use time::macros::format_description;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    /// Short label used in listings.
    pub fn label(&self) -> String {
        match self.as_u16() {
            0 => "Stored".to_string(),
            8 => "Defl:N".to_string(),
            9 => "Defl64".to_string(),
            12 => "BZip2".to_string(),
            14 => "LZMA".to_string(),
            93 => "Zstd".to_string(),
            95 => "XZ".to_string(),
            99 => "AES".to_string(),
            other => format!("Unk:{other:03}"),
        }
    }
}

/// General purpose flag bits.
pub mod flags {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    pub const STRONG_ENCRYPTION: u16 = 0x0040;
    pub const UTF8_NAME: u16 = 0x0800;
}

/// Extra field header IDs.
pub mod extra_id {
    pub const ZIP64: u16 = 0x0001;
    pub const STRONG_ENCRYPTION: u16 = 0x0017;
    pub const EXTENDED_TIMESTAMP: u16 = 0x5455;
    pub const UNIX_UID_GID: u16 = 0x7875;
    pub const AES: u16 = 0x9901;
}

pub const U16_SENTINEL: u16 = 0xFFFF;
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;

/// Classic End of Central Directory record - 22 bytes plus comment
#[derive(Debug, Clone)]
pub struct EocdRecord {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EocdRecord {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Parse the fixed part of the record. The signature is checked, the
    /// comment is not.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }

        let mut cursor = Cursor::new(&data[4..Self::SIZE]);

        Some(Self {
            disk_number: cursor.read_u16::<LittleEndian>().ok()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().ok()?,
            disk_entries: cursor.read_u16::<LittleEndian>().ok()?,
            total_entries: cursor.read_u16::<LittleEndian>().ok()?,
            cd_size: cursor.read_u32::<LittleEndian>().ok()?,
            cd_offset: cursor.read_u32::<LittleEndian>().ok()?,
            comment_len: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == U16_SENTINEL
            || self.total_entries == U16_SENTINEL
            || self.cd_size == U32_SENTINEL
            || self.cd_offset == U32_SENTINEL
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EocdLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EocdLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }

        let mut cursor = Cursor::new(&data[4..Self::SIZE]);

        Some(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().ok()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().ok()?,
            total_disks: cursor.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EocdRecord {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EocdRecord {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }

        let mut cursor = Cursor::new(&data[4..Self::MIN_SIZE]);

        Some(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().ok()?,
            version_made_by: cursor.read_u16::<LittleEndian>().ok()?,
            version_needed: cursor.read_u16::<LittleEndian>().ok()?,
            disk_number: cursor.read_u32::<LittleEndian>().ok()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().ok()?,
            disk_entries: cursor.read_u64::<LittleEndian>().ok()?,
            total_entries: cursor.read_u64::<LittleEndian>().ok()?,
            cd_size: cursor.read_u64::<LittleEndian>().ok()?,
            cd_offset: cursor.read_u64::<LittleEndian>().ok()?,
        })
    }
}

/// Where the central directory lives, normalized over the classic and Zip64 records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entry_count: u64,
    pub directory_size: u64,
    pub directory_offset: u64,
    pub comment: Vec<u8>,
    /// Absolute offset of the classic record.
    pub record_offset: u64,
    pub zip64: bool,
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// One parsed central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    /// Name bytes exactly as stored in the archive.
    pub raw_name: Vec<u8>,
    /// Decoded name: UTF-8 when possible, otherwise one char per byte.
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub flags: u16,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    /// Modification time from the extended timestamp extra field.
    pub unix_mtime: Option<u32>,
    pub unix_uid: Option<u32>,
    pub unix_gid: Option<u32>,
    pub is_directory: bool,
    /// Set when the entry needs something this crate cannot do (encryption).
    pub unsupported: Option<&'static str>,
}

impl CentralDirectoryEntry {
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & flags::UTF8_NAME != 0
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// `YYYY-MM-DD HH:MM`, preferring the extended timestamp (UTC) over the DOS fields.
    pub fn modified(&self) -> String {
        let extended = self
            .unix_mtime
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(i64::from(secs)).ok())
            .and_then(|t| {
                t.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
                    .ok()
            });
        extended.unwrap_or_else(|| {
            let (year, month, day) = self.mod_date();
            let (hour, minute, _) = self.mod_time();
            format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}")
        })
    }
}

/// Decode an entry name. Names flagged UTF-8 or that happen to be valid
/// UTF-8 decode as such; anything else maps each byte to the char with the
/// same code point, so the name still corresponds one-to-one with its bytes.
pub fn decode_name(raw: &[u8], utf8_flag: bool) -> String {
    match std::str::from_utf8(raw) {
        Ok(name) => name.to_string(),
        Err(_) => {
            if utf8_flag {
                tracing::warn!("entry name flagged UTF-8 is not valid UTF-8, decoding bytes literally");
            }
            raw.iter().map(|&b| b as char).collect()
        }
    }
}

/// Redundant copy of the entry metadata stored in front of its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    /// Parse the fixed 30-byte part.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < LFH_SIZE || &data[0..4] != LFH_SIGNATURE {
            return None;
        }

        let mut cursor = Cursor::new(&data[4..LFH_SIZE]);

        Some(Self {
            version_needed: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            compression_method: CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>().ok()?),
            last_mod_time: cursor.read_u16::<LittleEndian>().ok()?,
            last_mod_date: cursor.read_u16::<LittleEndian>().ok()?,
            crc32: cursor.read_u32::<LittleEndian>().ok()?,
            compressed_size: cursor.read_u32::<LittleEndian>().ok()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>().ok()?,
            file_name_length: cursor.read_u16::<LittleEndian>().ok()?,
            extra_field_length: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Bytes between the header start and the entry data.
    pub fn header_len(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}
