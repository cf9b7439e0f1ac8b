//! # s3unzip
//!
//! Extract individual entries from ZIP archives stored in S3-compatible
//! object storage, over HTTP, or on local disk, without downloading the
//! whole archive.
//!
//! Everything is read through ranged requests: the tail of the archive to
//! find the end of central directory record, the central directory itself,
//! and then only the bytes of the entries asked for. Entry data is inflated
//! as it streams in and checked against its CRC-32.
//!
//! ## Features
//!
//! - `s3://bucket/key` locators with AWS Signature Version 4 signing
//! - Plain HTTP(S) URLs and local files
//! - ZIP64 archives and entries
//! - STORED and DEFLATE entries
//! - Wildcard entry selection and concurrent extraction
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use s3unzip::{HttpOptions, S3Config, S3Location, ZipExtractor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let location = S3Location::parse("s3://bucket/archive.zip").expect("s3 locator");
//!     let reader = location.open(&S3Config::default(), &HttpOptions::default()).await?;
//!     let extractor = ZipExtractor::open(Arc::new(reader)).await?;
//!
//!     for entry in extractor.entries() {
//!         println!("{}", entry.file_name);
//!     }
//!     let first = extractor.entries()[0].clone();
//!     let bytes = extractor.extract_to_memory(&first).await?;
//!     println!("{} bytes", bytes.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod listing;
pub mod sink;
pub mod zip;

pub use cli::Cli;
pub use config::{ExtractOptions, HttpOptions, LocatorOptions, S3Config};
pub use error::{Error, Result, SourceError};
pub use io::{HttpRangeReader, LocalFileReader, MemorySource, RangeBody, RangeSource, S3Location};
pub use sink::{DirectorySinks, FileSink, Overwrite, Sink, SinkFactory, StdoutSink};
pub use zip::{
    CentralDirectoryEntry, DuplicateNames, EntryResolver, MatchSpec, Mode, ZipExtractor,
};
