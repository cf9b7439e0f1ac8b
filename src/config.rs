//! Configuration structs.
//!
//! Nothing here is process-global: each struct is built once by the caller
//! and handed to whichever constructor needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::zip::DuplicateNames;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `key = value`")]
    Syntax { line: usize },

    #[error("invalid value for `{key}`: {value}")]
    InvalidValue { key: String, value: String },
}

/// Connection settings for an S3-compatible object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// Endpoint host (and optional port), e.g. `s3.amazonaws.com` or `minio.local:9000`.
    pub host_base: String,
    pub use_https: bool,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            host_base: "s3.amazonaws.com".to_string(),
            use_https: true,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            session_token: None,
        }
    }
}

impl S3Config {
    /// Load an s3cmd-style configuration file (usually `~/.s3cfg`).
    pub fn from_s3cfg(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_s3cfg(&text)
    }

    /// Parse the `[default]` section of an s3cmd configuration.
    ///
    /// Keys outside that section and keys this crate has no use for are ignored.
    pub fn parse_s3cfg(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut in_default = false;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_default = section.trim() == "default";
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(ConfigError::Syntax { line: index + 1 })?;
            if !in_default {
                continue;
            }
            let (key, value) = (key.trim(), value.trim());
            let non_empty = || (!value.is_empty()).then(|| value.to_string());

            match key {
                "host_base" => {
                    if !value.is_empty() {
                        config.host_base = value.to_string();
                    }
                }
                "use_https" => config.use_https = parse_bool(key, value)?,
                "bucket_location" => {
                    if !value.is_empty() {
                        config.region = normalize_region(value);
                    }
                }
                "access_key" => config.access_key = non_empty(),
                "secret_key" => config.secret_key = non_empty(),
                "access_token" => config.session_token = non_empty(),
                _ => {}
            }
        }

        Ok(config)
    }

    /// Whether requests should be signed.
    pub fn has_credentials(&self) -> bool {
        self.access_key.is_some() && self.secret_key.is_some()
    }

    pub fn endpoint_scheme(&self) -> &'static str {
        if self.use_https { "https" } else { "http" }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// s3cmd writes `US` for the classic region.
fn normalize_region(value: &str) -> String {
    if value.eq_ignore_ascii_case("us") {
        "us-east-1".to_string()
    } else {
        value.to_string()
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    /// Attempts per request before a connect or timeout error is surfaced.
    pub max_retry: u32,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retry: 10,
        }
    }
}

/// Tail-window settings for finding the end of central directory record.
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    /// First window read from the end of the archive.
    pub initial_window: u64,
    /// Largest window tried before giving up.
    pub max_window: u64,
}

/// Largest comment (65535) plus the fixed record.
pub const DEFAULT_INITIAL_WINDOW: u64 = 65535 + 22;

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_INITIAL_WINDOW,
            max_window: 8 * 1024 * 1024,
        }
    }
}

/// Extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Entries streamed at the same time by `extract_many`.
    pub concurrency: usize,
    pub duplicates: DuplicateNames,
    pub locator: LocatorOptions,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            duplicates: DuplicateNames::MostRecent,
            locator: LocatorOptions::default(),
        }
    }
}
