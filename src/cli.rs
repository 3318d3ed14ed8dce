// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `loaddag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "loaddag",
    version,
    about = "Run a warehouse load DAG: stage, load facts and dimensions, check quality.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the DAG definition (TOML).
    #[arg(long, value_name = "PATH", default_value = "Loaddag.toml")]
    pub config: PathBuf,

    /// Logical date to process (YYYY-MM-DD or RFC 3339).
    ///
    /// Overrides `[config].logical_date`; defaults to now.
    #[arg(long, value_name = "DATE")]
    pub logical_date: Option<String>,

    /// Maximum number of tasks running at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub max_concurrency: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOADDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate, print the plan, but don't touch the warehouse.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = CliArgs::try_parse_from([
            "loaddag",
            "--config",
            "pipelines/sparkify.toml",
            "--logical-date",
            "2018-11-01",
            "--max-concurrency",
            "2",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("pipelines/sparkify.toml"));
        assert_eq!(args.logical_date.as_deref(), Some("2018-11-01"));
        assert_eq!(args.max_concurrency, Some(2));
        assert!(args.dry_run);
        assert!(args.log_level.is_none());
    }
}
