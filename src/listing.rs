//! Archive listings (`-l` and `-v`).

use crate::error::{Error, Result};
use crate::sink::Sink;
use crate::zip::CentralDirectoryEntry;

/// Render a listing of `entries` in the order given, with a totals line.
pub fn render(entries: &[&CentralDirectoryEntry], verbose: bool) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 4);
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut files = 0usize;

    lines.push(if verbose {
        format!(
            "{:>10}  {:<7}  {:>10}  {:>4}  {:<8}  {:<16}  {:>10}  Name",
            "Length", "Method", "Size", "Cmpr", "CRC-32", "Date     Time", "Offset"
        )
    } else {
        format!(
            "{:>10}  {:<7}  {:>10}  {:<8}  {:<16}  Name",
            "Length", "Method", "Size", "CRC-32", "Date     Time"
        )
    });
    let rule = "-".repeat(if verbose { 92 } else { 70 });
    lines.push(rule.clone());

    for entry in entries {
        let method = entry.compression_method.label();
        lines.push(if verbose {
            format!(
                "{:>10}  {:<7}  {:>10}  {:>4}  {:08x}  {:<16}  {:>10}  {}",
                entry.uncompressed_size,
                method,
                entry.compressed_size,
                ratio(entry.compressed_size, entry.uncompressed_size),
                entry.crc32,
                entry.modified(),
                entry.lfh_offset,
                entry.file_name
            )
        } else {
            format!(
                "{:>10}  {:<7}  {:>10}  {:08x}  {:<16}  {}",
                entry.uncompressed_size,
                method,
                entry.compressed_size,
                entry.crc32,
                entry.modified(),
                entry.file_name
            )
        });

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            files += 1;
        }
    }

    lines.push(rule);
    let noun = if files == 1 { "file" } else { "files" };
    lines.push(if verbose {
        format!(
            "{:>10}  {:<7}  {:>10}  {:>4}  {:<8}  {:<16}  {:>10}  {files} {noun}",
            total_uncompressed,
            "",
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            "",
            ""
        )
    } else {
        format!(
            "{:>10}  {:<7}  {:>10}  {:<8}  {:<16}  {files} {noun}",
            total_uncompressed, "", total_compressed, "", ""
        )
    });

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Space saved by compression, as a percentage. Negative when the entry grew.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "0%".to_string();
    }
    let saved = 100.0 - (compressed as f64 * 100.0 / uncompressed as f64);
    format!("{:.0}%", saved)
}

/// Write a listing through `sink`.
pub async fn write_listing(
    entries: &[&CentralDirectoryEntry],
    verbose: bool,
    sink: &mut dyn Sink,
) -> Result<()> {
    let text = render(entries, verbose);
    sink.write(text.as_bytes())
        .await
        .map_err(|e| Error::sink("listing", e))?;
    sink.finish().await.map_err(|e| Error::sink("listing", e))
}
