//! Error types.
//!
//! Archive-scoped errors carry the archive locator, entry-scoped errors carry
//! the entry name. Transport failures are wrapped in [`Error::Transport`]
//! while the directory is being read and in [`Error::Source`] while an entry
//! is.

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by a [`RangeSource`](crate::io::RangeSource) implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: u64, got: u64 },

    #[error("object changed while reading (expected ETag {expected})")]
    Changed { expected: String },

    #[error("{0}")]
    Unreachable(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while locating, resolving or streaming archive entries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{locator}: not a zip archive: {reason}")]
    NotAZipArchive { locator: String, reason: String },

    #[error("{locator}: truncated central directory: {reason}")]
    TruncatedDirectory { locator: String, reason: String },

    #[error("{subject}: unsupported feature: {feature}")]
    UnsupportedFeature { subject: String, feature: String },

    #[error("no entry matches '{pattern}'")]
    NoMatch { pattern: String },

    #[error("no files to extract were named")]
    NoTargetSpecified,

    #[error("{name}: corrupt entry: {reason}")]
    CorruptEntry { name: String, reason: String },

    #[error(
        "{name}: CRC-32 mismatch (expected {expected:08x}, got {actual:08x}); \
         the data was already written and may be corrupt"
    )]
    CrcMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("{locator}: {source}")]
    Transport {
        locator: String,
        #[source]
        source: SourceError,
    },

    #[error("{subject}: {source}")]
    Source {
        subject: String,
        #[source]
        source: SourceError,
    },

    #[error("{subject}: cannot write output: {source}")]
    Sink {
        subject: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn not_a_zip(locator: &str, reason: impl Into<String>) -> Self {
        Error::NotAZipArchive {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn truncated(locator: &str, reason: impl Into<String>) -> Self {
        Error::TruncatedDirectory {
            locator: locator.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        Error::CorruptEntry {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(locator: &str, source: SourceError) -> Self {
        Error::Transport {
            locator: locator.to_string(),
            source,
        }
    }

    pub(crate) fn source(subject: &str, source: SourceError) -> Self {
        Error::Source {
            subject: subject.to_string(),
            source,
        }
    }

    pub(crate) fn sink(subject: &str, source: std::io::Error) -> Self {
        Error::Sink {
            subject: subject.to_string(),
            source,
        }
    }

    /// Whether this error concerns a single entry rather than the whole archive.
    ///
    /// Entry-scoped failures do not stop the extraction of sibling entries.
    pub fn is_entry_scoped(&self) -> bool {
        matches!(
            self,
            Error::CorruptEntry { .. }
                | Error::CrcMismatch { .. }
                | Error::UnsupportedFeature { .. }
                | Error::Source { .. }
                | Error::Sink { .. }
        )
    }

    /// Whether this is a post-hoc integrity warning: the bytes were already
    /// forwarded and only the final check failed.
    pub fn is_integrity_warning(&self) -> bool {
        matches!(self, Error::CrcMismatch { .. })
    }
}
