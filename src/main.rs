//! Main entry point for the s3unzip CLI application.
//!
//! Lists or extracts entries of a ZIP archive addressed as `s3://bucket/key`,
//! an HTTP(S) URL or a local path, reading only the byte ranges it needs.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use s3unzip::listing::write_listing;
use s3unzip::{
    Cli, DirectorySinks, DuplicateNames, Error, ExtractOptions, HttpOptions, HttpRangeReader,
    LocalFileReader, Overwrite, RangeSource, S3Config, S3Location, StdoutSink,
    ZipExtractor,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("s3unzip: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so `-p` output stays clean. `RUST_LOG` wins over `-q`.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Open the archive and dispatch. Returns whether every entry succeeded.
async fn run(cli: &Cli) -> Result<bool> {
    let http = HttpOptions {
        timeout: Duration::from_secs(cli.timeout),
        max_retry: cli.retries,
    };
    let options = ExtractOptions {
        concurrency: cli.concurrency.max(1),
        duplicates: if cli.all_duplicates {
            DuplicateNames::KeepAll
        } else {
            DuplicateNames::MostRecent
        },
        ..ExtractOptions::default()
    };

    if cli.is_s3() {
        let location = S3Location::parse(&cli.archive)
            .with_context(|| format!("invalid S3 locator: {}", cli.archive))?;
        let config = s3_config(cli)?;
        debug!(endpoint = %config.host_base, region = %config.region, signed = config.has_credentials(), "using S3 endpoint");
        let reader = location
            .open(&config, &http)
            .await
            .with_context(|| format!("cannot open {location}"))?;
        let reader = Arc::new(reader);
        let ok = process_zip(Arc::clone(&reader), cli, options).await?;
        report_transfer(cli, &reader);
        Ok(ok)
    } else if cli.is_http_url() {
        let reader = HttpRangeReader::new(&cli.archive, &http)
            .await
            .with_context(|| format!("cannot open {}", cli.archive))?;
        let reader = Arc::new(reader);
        let ok = process_zip(Arc::clone(&reader), cli, options).await?;
        report_transfer(cli, &reader);
        Ok(ok)
    } else {
        let reader = LocalFileReader::new(Path::new(&cli.archive))
            .with_context(|| format!("cannot open {}", cli.archive))?;
        process_zip(Arc::new(reader), cli, options).await
    }
}

/// Configuration file, then environment and flags (both resolved by clap).
fn s3_config(cli: &Cli) -> Result<S3Config> {
    let mut config = match &cli.config {
        Some(path) => S3Config::from_s3cfg(path)?,
        None => match default_s3cfg() {
            Some(path) if path.is_file() => S3Config::from_s3cfg(&path)?,
            _ => S3Config::default(),
        },
    };

    if let Some(endpoint) = &cli.endpoint {
        if let Some(host) = endpoint.strip_prefix("http://") {
            config.use_https = false;
            config.host_base = host.to_string();
        } else if let Some(host) = endpoint.strip_prefix("https://") {
            config.use_https = true;
            config.host_base = host.to_string();
        } else {
            config.host_base = endpoint.clone();
        }
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if let Some(key) = &cli.access_key {
        config.access_key = Some(key.clone());
    }
    if let Some(secret) = &cli.secret_key {
        config.secret_key = Some(secret.clone());
    }
    if let Some(token) = &cli.session_token {
        config.session_token = Some(token.clone());
    }
    Ok(config)
}

fn default_s3cfg() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".s3cfg"))
}

/// Display network transfer statistics for remote sources.
fn report_transfer(cli: &Cli, reader: &HttpRangeReader) {
    if !cli.is_quiet() {
        eprintln!(
            "\nTotal bytes transferred: {}",
            format_size(reader.transferred_bytes())
        );
    }
}

/// List or extract, depending on the flags.
async fn process_zip<R: RangeSource + 'static>(
    reader: Arc<R>,
    cli: &Cli,
    options: ExtractOptions,
) -> Result<bool> {
    if !cli.is_quiet() {
        println!("Archive:  {}", reader.locator());
    }
    let extractor = ZipExtractor::open_with(reader, options).await?;

    let resolution = cli.select(extractor.resolver())?;
    let mut ok = resolution.unmatched.is_empty();

    if cli.is_listing() {
        write_listing(&resolution.selected, cli.verbose, &mut StdoutSink::new()).await?;
        return Ok(ok);
    }

    if cli.pipe {
        let mut stdout = StdoutSink::new();
        for entry in resolution.selected.iter().filter(|e| !e.is_directory) {
            if let Err(e) = extractor.extract_entry(entry, &mut stdout).await {
                ok = false;
                report_failure(&e)?;
            }
        }
        return Ok(ok);
    }

    let overwrite = if cli.overwrite {
        Overwrite::Always
    } else if cli.never_overwrite {
        Overwrite::Never
    } else {
        Overwrite::Skip
    };
    let dir = cli.extract_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let sinks = DirectorySinks::new(dir)
        .junk_paths(cli.junk_paths)
        .overwrite(overwrite)
        .quiet(cli.is_quiet());

    let entries = resolution.selected.into_iter().cloned().collect();
    for outcome in extractor.extract_many(entries, Arc::new(sinks)).await {
        match outcome.result {
            Ok(Some(report)) => debug!(name = %report.name, bytes = report.bytes_written, "extracted"),
            Ok(None) => debug!(name = %outcome.name, "skipped"),
            Err(e) => {
                ok = false;
                report_failure(&e)?;
            }
        }
    }
    Ok(ok)
}

/// Print an entry failure. Errors that concern the whole archive are returned.
fn report_failure(error: &Error) -> Result<()> {
    if !error.is_entry_scoped() {
        anyhow::bail!("{error}");
    }
    if error.is_integrity_warning() {
        eprintln!("warning: {error}");
    } else {
        eprintln!("error: {error}");
    }
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
