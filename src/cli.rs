//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvester_core::{ConfigOverrides, DEFAULT_CONFIG_FILE};

/// Harvest open-access papers and extract their metadata.
///
/// Discovers PDF locators through a paginated works API, downloads them into a
/// local directory, extracts text from the first pages, and stores model
/// extracted metadata in SQLite.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of workers (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Number of locators to collect before processing
    #[arg(short = 'n', long = "target")]
    pub target_count: Option<usize>,

    /// Attempts per document, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Directory downloaded PDFs are written to
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long = "db")]
    pub db_path: Option<PathBuf>,
}

impl Args {
    /// Config values supplied on the command line.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            concurrency: self.concurrency.map(usize::from),
            target_count: self.target_count,
            max_retries: self.max_retries.map(u32::from),
            output_dir: self.output_dir.clone(),
            db_path: self.db_path.clone(),
        }
    }

    /// Default log filter for the verbosity flags.
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}
