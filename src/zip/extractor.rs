use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::locator::{CentralDirectory, CentralDirectoryLocator};
use super::resolver::EntryResolver;
use super::streamer::EntryStreamer;
use super::structures::CentralDirectoryEntry;
use crate::config::ExtractOptions;
use crate::error::{Error, Result};
use crate::io::RangeSource;
use crate::sink::{Sink, SinkFactory};

/// What a successful extraction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub name: String,
    pub bytes_written: u64,
    pub crc32: u32,
}

/// The result for one entry of [`ZipExtractor::extract_many`].
///
/// `Ok(None)` means the sink factory skipped the entry.
#[derive(Debug)]
pub struct EntryOutcome {
    pub name: String,
    pub result: Result<Option<ExtractReport>>,
}

/// ZIP file extractor.
///
/// The central directory is read once, in [`ZipExtractor::open`]; every
/// later operation works from that table.
pub struct ZipExtractor<R: RangeSource + ?Sized> {
    source: Arc<R>,
    directory: Arc<CentralDirectory>,
    options: ExtractOptions,
}

impl<R: RangeSource + ?Sized + 'static> ZipExtractor<R> {
    pub async fn open(source: Arc<R>) -> Result<Self> {
        Self::open_with(source, ExtractOptions::default()).await
    }

    pub async fn open_with(source: Arc<R>, options: ExtractOptions) -> Result<Self> {
        let directory = CentralDirectoryLocator::new(source.as_ref())
            .with_options(options.locator.clone())
            .locate()
            .await?;
        debug!(
            locator = source.locator(),
            entries = directory.entries.len(),
            "opened archive"
        );
        Ok(Self {
            source,
            directory: Arc::new(directory),
            options,
        })
    }

    pub fn source(&self) -> &Arc<R> {
        &self.source
    }

    pub fn directory(&self) -> &CentralDirectory {
        &self.directory
    }

    /// All entries in directory order.
    pub fn entries(&self) -> &[CentralDirectoryEntry] {
        &self.directory.entries
    }

    /// A resolver over this archive's entries using the configured duplicate policy.
    pub fn resolver(&self) -> EntryResolver<'_> {
        EntryResolver::new(self.entries()).duplicates(self.options.duplicates)
    }

    pub fn streamer(&self, entry: &CentralDirectoryEntry) -> EntryStreamer<R> {
        EntryStreamer::new(Arc::clone(&self.source), entry.clone())
    }

    /// Stream one entry into `sink`.
    ///
    /// On success the sink is finished. A CRC mismatch also finishes the sink
    /// (all bytes were delivered) and is then returned; any other failure
    /// aborts the sink.
    pub async fn extract_entry(
        &self,
        entry: &CentralDirectoryEntry,
        sink: &mut dyn Sink,
    ) -> Result<ExtractReport> {
        drive(Arc::clone(&self.source), entry, sink).await
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, entry: &CentralDirectoryEntry) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(entry.uncompressed_size.min(64 * 1024 * 1024) as usize);
        self.extract_entry(entry, &mut buf).await?;
        Ok(buf)
    }

    /// Extract several entries concurrently, one sink per entry.
    ///
    /// At most `concurrency` entries stream at the same time. Outcomes come
    /// back in the order of `entries`; a failed entry does not stop the others.
    pub async fn extract_many(
        &self,
        entries: Vec<CentralDirectoryEntry>,
        factory: Arc<dyn SinkFactory>,
    ) -> Vec<EntryOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let names: Vec<String> = entries.iter().map(|e| e.file_name.clone()).collect();
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let source = Arc::clone(&self.source);
            let factory = Arc::clone(&factory);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = extract_one(source, &entry, factory.as_ref()).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<Option<ExtractReport>>>> =
            names.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!("extraction task failed: {}", e),
            }
        }

        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(Error::sink(
                        &name,
                        std::io::Error::other("extraction task did not complete"),
                    ))
                });
                EntryOutcome { name, result }
            })
            .collect()
    }
}

async fn extract_one<R: RangeSource + ?Sized>(
    source: Arc<R>,
    entry: &CentralDirectoryEntry,
    factory: &dyn SinkFactory,
) -> Result<Option<ExtractReport>> {
    match factory.open(entry).await? {
        Some(mut sink) => drive(source, entry, sink.as_mut()).await.map(Some),
        None => Ok(None),
    }
}

async fn drive<R: RangeSource + ?Sized>(
    source: Arc<R>,
    entry: &CentralDirectoryEntry,
    sink: &mut dyn Sink,
) -> Result<ExtractReport> {
    let name = entry.file_name.as_str();
    let mut streamer = EntryStreamer::new(source, entry.clone());
    let mut bytes_written = 0u64;

    loop {
        match streamer.next_chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = sink.write(&chunk).await {
                    abort(sink, name).await;
                    return Err(Error::sink(name, e));
                }
                bytes_written += chunk.len() as u64;
            }
            Ok(None) => break,
            Err(e @ Error::CrcMismatch { .. }) => {
                sink.finish().await.map_err(|e| Error::sink(name, e))?;
                return Err(e);
            }
            Err(e) => {
                abort(sink, name).await;
                return Err(e);
            }
        }
    }

    sink.finish().await.map_err(|e| Error::sink(name, e))?;
    Ok(ExtractReport {
        name: name.to_string(),
        bytes_written,
        crc32: entry.crc32,
    })
}

async fn abort(sink: &mut dyn Sink, name: &str) {
    if let Err(e) = sink.abort().await {
        warn!("{}: could not clean up output: {}", name, e);
    }
}
