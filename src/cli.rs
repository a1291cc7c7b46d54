// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `taskwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskwarden",
    version,
    about = "Run shell tasks on cron schedules and after each other.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// If omitted, `TASKWARDEN_CONFIG` or `taskwarden.toml` in the current
    /// directory is used when present; otherwise built-in defaults apply.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory of `<collection>.tasks.json` files (overrides `tasks_path`).
    #[arg(long, value_name = "DIR")]
    pub tasks_path: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKWARDEN_LOG` or `log.level` will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Start with dispatch paused (timers still enqueue).
    #[arg(long)]
    pub paused: bool,

    /// Load config and tasks, print them, but don't execute any commands.
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
