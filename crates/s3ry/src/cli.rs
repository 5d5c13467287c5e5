use std::path::PathBuf;

use clap::Parser;

use s3ry_core::config::{LogLevel, Overrides, UiMode, parse_byte_size};
use s3ry_core::messages::Language;

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse()
}

fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    s.parse()
}

fn parse_chunk_size(s: &str) -> Result<u64, String> {
    parse_byte_size(s)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "s3ry",
    version,
    about = "Interactive S3 bucket browser and concurrent transfer tool"
)]
pub struct Cli {
    /// Override the default region for the session.
    #[arg(long, value_name = "id")]
    pub region: Option<String>,

    /// Named credential profile to use.
    #[arg(long, value_name = "name")]
    pub profile: Option<String>,

    /// Use the list-prompt UI instead of the full-screen TUI.
    #[arg(long)]
    pub legacy_ui: bool,

    /// Enable the concurrent transfer engine.
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub modern_backend: bool,

    /// Worker count, clamped to [1, 1024].
    #[arg(long, value_name = "n")]
    pub workers: Option<usize>,

    /// Multipart part size in bytes; accepts K/M/G suffixes. Must be at
    /// least 5 MiB.
    #[arg(long, value_name = "bytes", value_parser = parse_chunk_size)]
    pub chunk_size: Option<u64>,

    /// UI language.
    #[arg(long, value_name = "en|ja", value_parser = parse_language)]
    pub lang: Option<Language>,

    /// Log verbosity.
    #[arg(long, value_name = "level", value_parser = parse_log_level)]
    pub log_level: Option<LogLevel>,

    /// Explicit config file path.
    #[arg(long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Shortcut for --log-level debug.
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Flag values in the shape the settings resolver expects. Only values
    /// actually given on the command line are set.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            ui_mode: self.legacy_ui.then_some(UiMode::Legacy),
            language: self.lang,
            region: self.region.clone(),
            profile: self.profile.clone(),
            workers: self.workers,
            chunk_size: self.chunk_size,
            log_level: if self.verbose {
                Some(LogLevel::Debug)
            } else {
                self.log_level
            },
        }
    }
}
