//! Where extracted bytes go.
//!
//! A [`Sink`] receives one entry's output in order. The extractor calls
//! [`Sink::finish`] after the last chunk and [`Sink::abort`] when the
//! extraction failed part way; a sink sees exactly one of the two.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{Error, Result};
use crate::zip::CentralDirectoryEntry;

#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// All output has been written.
    async fn finish(&mut self) -> io::Result<()>;

    /// The extraction failed; what was written so far is left as is.
    async fn abort(&mut self) -> io::Result<()>;
}

#[async_trait]
impl Sink for Vec<u8> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn abort(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes to the process's standard output.
pub struct StdoutSink {
    stdout: tokio::io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.stdout.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.stdout.flush().await
    }

    async fn abort(&mut self) -> io::Result<()> {
        self.stdout.flush().await
    }
}

/// Writes to a file, creating parent directories as needed.
pub struct FileSink {
    path: PathBuf,
    file: BufWriter<fs::File>,
}

impl FileSink {
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.flush().await
    }

    async fn abort(&mut self) -> io::Result<()> {
        debug!(path = %self.path.display(), "leaving partial output");
        self.file.flush().await
    }
}

/// Opens one sink per entry. Returning `None` skips the entry.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, entry: &CentralDirectoryEntry) -> Result<Option<Box<dyn Sink>>>;
}

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overwrite {
    /// Skip the entry and say so (`use -o to overwrite`).
    #[default]
    Skip,
    /// Skip the entry quietly.
    Never,
    /// Replace the existing file.
    Always,
}

/// Extracts entries below a directory, one file per entry.
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    dir: PathBuf,
    junk_paths: bool,
    overwrite: Overwrite,
    quiet: bool,
}

impl DirectorySinks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            junk_paths: false,
            overwrite: Overwrite::default(),
            quiet: false,
        }
    }

    /// Drop the directory part of entry names.
    pub fn junk_paths(mut self, junk: bool) -> Self {
        self.junk_paths = junk;
        self
    }

    pub fn overwrite(mut self, policy: Overwrite) -> Self {
        self.overwrite = policy;
        self
    }

    /// Suppress the per-entry progress lines.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Where `entry` lands. `None` when junking paths leaves nothing to create.
    ///
    /// Absolute names and names with `..` components are refused.
    pub fn output_path(&self, entry: &CentralDirectoryEntry) -> Result<Option<PathBuf>> {
        let name = entry.file_name.as_str();
        let unsafe_path =
            || Error::corrupt(name, "refusing to extract outside the output directory");

        if name.starts_with('/') || name.starts_with('\\') {
            return Err(unsafe_path());
        }
        let mut relative = PathBuf::new();
        for part in name.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => return Err(unsafe_path()),
                part if part.len() >= 2 && part.as_bytes()[1] == b':' && relative.as_os_str().is_empty() => {
                    return Err(unsafe_path());
                }
                part => relative.push(part),
            }
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(unsafe_path());
        }

        if self.junk_paths {
            if entry.is_directory {
                return Ok(None);
            }
            return Ok(relative.file_name().map(|base| self.dir.join(base)));
        }
        if relative.as_os_str().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.dir.join(relative)))
    }
}

#[async_trait]
impl SinkFactory for DirectorySinks {
    async fn open(&self, entry: &CentralDirectoryEntry) -> Result<Option<Box<dyn Sink>>> {
        let Some(path) = self.output_path(entry)? else {
            return Ok(None);
        };

        if entry.is_directory {
            if !self.quiet {
                println!("   creating: {}", entry.file_name);
            }
            fs::create_dir_all(&path)
                .await
                .map_err(|e| Error::sink(&entry.file_name, e))?;
            return Ok(None);
        }

        if fs::try_exists(&path).await.unwrap_or(false) {
            match self.overwrite {
                Overwrite::Always => {}
                Overwrite::Never => {
                    if !self.quiet {
                        eprintln!("Skipping: {} (file exists)", entry.file_name);
                    }
                    return Ok(None);
                }
                Overwrite::Skip => {
                    if !self.quiet {
                        eprintln!("Skipping: {} (use -o to overwrite)", entry.file_name);
                    }
                    return Ok(None);
                }
            }
        }

        if !self.quiet {
            println!("  inflating: {}", entry.file_name);
        }
        let sink = FileSink::create(&path)
            .await
            .map_err(|e| Error::sink(&entry.file_name, e))?;
        Ok(Some(Box::new(sink)))
    }
}
