//! ZIP archive parsing and extraction over range reads.
//!
//! ## Architecture
//!
//! - [`structures`]: on-disk records (EOCD, Zip64 records, directory and local headers)
//! - [`locator`]: finding the end of central directory record and parsing the entry table
//! - [`resolver`]: picking entries by wildcard pattern
//! - [`streamer`]: validating one entry's local header and inflating its data
//! - [`extractor`]: the high-level API tying these together
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The EOCD is read first (from the end of the file), then the Central
//! Directory, so an archive can be listed with a couple of range requests
//! and a single entry extracted with a couple more.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions for archives and entries over 4 GiB
//! - STORED and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

pub mod extractor;
pub mod glob;
pub mod locator;
pub mod resolver;
pub mod streamer;
pub mod structures;

pub use extractor::{EntryOutcome, ExtractReport, ZipExtractor};
pub use glob::Pattern;
pub use locator::{CentralDirectory, CentralDirectoryLocator, parse_directory};
pub use resolver::{DuplicateNames, EntryResolver, MatchSpec, Mode, Resolution};
pub use streamer::{EntryStreamer, StreamState};
pub use structures::*;
