//! CLI argument parsing for the demorar scanner

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for scan reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "demorar")]
#[command(version)]
#[command(
    about = "Deprecated concurrency-API scanner with async task latency diagnostics",
    long_about = None
)]
pub struct Cli {
    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// List the builtin signature catalog and exit
    #[arg(long = "list-signatures")]
    pub list_signatures: bool,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Files or directories to scan
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}
