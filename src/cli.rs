use clap::Parser;
use std::path::PathBuf;

use crate::error::Result;
use crate::zip::{EntryResolver, MatchSpec, Mode, Resolution};

#[derive(Parser, Debug)]
#[command(name = "s3unzip")]
#[command(version)]
#[command(about = "Extract files from ZIP archives in S3 without downloading them", long_about = None)]
#[command(after_help = "Examples:\n  \
  s3unzip s3://bucket/data1.zip -x joe       extract all files except joe from data1.zip\n  \
  s3unzip -p s3://bucket/foo.zip | more      send contents of foo.zip via pipe into more\n  \
  s3unzip -l https://example.com/archive.zip list files from remote ZIP")]
pub struct Cli {
    /// Archive locator: s3://bucket/key, an HTTP(S) URL or a local path
    #[arg(value_name = "ARCHIVE")]
    pub archive: String,

    /// Entries to extract or list (wildcards allowed)
    #[arg(value_name = "PATTERNS")]
    pub patterns: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<PathBuf>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "PATTERN", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// s3cmd configuration file [default: ~/.s3cfg]
    #[arg(short = 'e', long = "env", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// S3 endpoint host, e.g. minio.local:9000 (overrides host_base)
    #[arg(long, env = "S3_ENDPOINT", value_name = "HOST")]
    pub endpoint: Option<String>,

    /// Signing region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Entries extracted at the same time
    #[arg(long, default_value_t = 4, value_name = "N")]
    pub concurrency: usize,

    /// Extract every entry with a matching name, not only the most recent
    #[arg(long)]
    pub all_duplicates: bool,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout: u64,

    /// Attempts per HTTP request on connect and timeout errors
    #[arg(long, default_value_t = 10, value_name = "N")]
    pub retries: u32,
}

impl Cli {
    pub fn is_s3(&self) -> bool {
        self.archive.starts_with("s3://")
    }

    pub fn is_http_url(&self) -> bool {
        self.archive.starts_with("http://") || self.archive.starts_with("https://")
    }

    pub fn is_listing(&self) -> bool {
        self.list || self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Entries this command acts on. Without patterns a listing shows the
    /// whole table, while extraction takes every entry under the duplicate
    /// policy.
    pub fn select<'a>(&self, resolver: EntryResolver<'a>) -> Result<Resolution<'a>> {
        let resolver = resolver.exclude(self.exclude.iter().map(MatchSpec::new).collect());
        let specs: Vec<MatchSpec> = self.patterns.iter().map(MatchSpec::new).collect();
        if self.is_listing() {
            resolver.resolve(&specs, Mode::List)
        } else if specs.is_empty() {
            Ok(Resolution {
                selected: resolver.all(),
                unmatched: Vec::new(),
            })
        } else {
            resolver.resolve(&specs, Mode::Extract)
        }
    }

    /// Default log filter directive for the chosen quiet level.
    pub fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => "warn",
            1 => "error",
            _ => "off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_unzip_style_flags() {
        let cli = Cli::try_parse_from([
            "s3unzip", "-qq", "-o", "-d", "out", "s3://b/a.zip", "small?.bin", "-x", "small2.bin",
        ])
        .unwrap();
        assert!(cli.is_s3());
        assert!(cli.is_very_quiet());
        assert_eq!(cli.log_level(), "off");
        assert_eq!(cli.patterns, vec!["small?.bin"]);
        assert_eq!(cli.exclude, vec!["small2.bin"]);
        assert_eq!(cli.extract_dir, Some(PathBuf::from("out")));
        assert_eq!(cli.concurrency, 4);
    }

    #[test]
    fn pipe_mode_is_quiet() {
        let cli = Cli::try_parse_from(["s3unzip", "-p", "archive.zip"]).unwrap();
        assert!(cli.is_quiet());
        assert!(!cli.is_listing());
        assert!(!cli.is_http_url());
    }
}
