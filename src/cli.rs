// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::graph::Jobs;
use crate::workspace::{ScriptOptions, WorkspaceOptions};

/// Command-line arguments for `taskdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Run dependent task scripts, re-running only what went stale.",
    long_about = None
)]
pub struct CliArgs {
    /// Root configuration files; dependencies are discovered from these.
    #[arg(required = true, value_name = "CONFIG")]
    pub roots: Vec<PathBuf>,

    /// Maximum number of tasks to run concurrently, or "unlimited".
    #[arg(long, short = 'j', value_name = "N", default_value = "unlimited", value_parser = parse_jobs)]
    pub jobs: Jobs,

    /// Keep watching declared inputs and re-run stale tasks.
    #[arg(long, short = 'w')]
    pub watch: bool,

    /// Env file path handed to task scripts via the env-file marker.
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Ask task scripts to emit colors even though their stdio is piped.
    #[arg(long)]
    pub force_colors: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl CliArgs {
    pub fn workspace_options(&self) -> WorkspaceOptions {
        WorkspaceOptions {
            roots: self.roots.clone(),
            jobs: self.jobs,
            watch_mode: self.watch,
            script_options: ScriptOptions {
                env_file: self.env_file.clone(),
                force_colors: self.force_colors,
            },
        }
    }
}

fn parse_jobs(s: &str) -> Result<Jobs, String> {
    s.parse()
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
