//! Library interface for the `orgstats` CLI.
//!
//! This crate exposes the CLI's argument parser as a library, primarily for
//! documentation generation and testing. The actual entry point is in
//! `main.rs`.
//!
//! # Structure
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`run`] - The report run behind the parser
//!
//! # Documentation Generation
//!
//! The [`command()`] function returns the clap `Command` for generating man pages
//! and shell completions via `xtask`.

pub mod run;

use clap::{CommandFactory, Parser};
use orgstats_core::{ReportFormat, ReportOptions};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Configure global color output based on this choice.
    ///
    /// Call this once at startup to set the color mode.
    pub fn apply(self) {
        match self {
            Self::Auto => {}
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    ORGSTATS_GITHUB_TOKEN   GitHub token (takes precedence over the keyring)
    RUST_LOG                Log filter (e.g., debug, orgstats_core=trace)
    ORGSTATS_LOG_PATH       Explicit log file path
    ORGSTATS_LOG_DIR        Log directory

CREDENTIALS:
    Without ORGSTATS_GITHUB_TOKEN, a token with read:org scope is read from the
    OS keyring under service `github-read-org`, account `may-read-org`.
";

/// Command-line interface definition for orgstats.
#[derive(Parser)]
#[command(name = "orgstats")]
#[command(
    about = "Who committed to and reviewed each repository of a GitHub organization",
    long_about = None
)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// GitHub organization to collect statistics for
    #[arg(value_name = "ORG")]
    pub org: String,

    /// Show all-time counts alongside the last year
    #[arg(long)]
    pub show_totals: bool,

    /// Output the data in CSV format
    #[arg(long, conflicts_with = "json")]
    pub csv: bool,

    /// Output the data as JSON (for scripting)
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long)]
    pub chdir: Option<PathBuf>,

    /// Only print errors (suppresses warnings/info and progress)
    #[arg(short, long)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, value_enum, default_value_t)]
    pub color: ColorChoice,
}

impl Cli {
    /// Report settings selected by the flags.
    pub const fn report_options(&self) -> ReportOptions {
        let format = if self.csv {
            ReportFormat::Csv
        } else if self.json {
            ReportFormat::Json
        } else {
            ReportFormat::Text
        };
        ReportOptions {
            show_totals: self.show_totals,
            format,
        }
    }
}

/// Returns the clap command for documentation generation
pub fn command() -> clap::Command {
    Cli::command()
}
