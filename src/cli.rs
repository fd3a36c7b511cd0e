//! CLI arguments and subcommands for taskshare.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use taskshare::process::SortKey;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format for the snapshot command
#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "taskshare",
    about = "Per-process private/shared/aliased memory accounting for Mach hosts",
    long_about = "Per-process private/shared/aliased memory accounting for Mach hosts.\n\n\
                  Enumerates every task through the host's processor sets, classifies each \
                  task's memory regions, detects shared objects that are only mapped by one \
                  task and serves the results as Prometheus metrics and JSON.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Seconds between refresh passes
    #[arg(long)]
    pub refresh_interval: Option<u64>,

    /// Include only processes whose command contains one of these (comma-separated)
    #[arg(long)]
    pub include_names: Option<String>,

    /// Exclude processes whose command contains one of these (comma-separated)
    #[arg(long)]
    pub exclude_names: Option<String>,

    /// Maximum width of recovered command names
    #[arg(long)]
    pub command_width: Option<usize>,

    /// Number of host samples kept for /history
    #[arg(long)]
    pub history_capacity: Option<usize>,

    /// Processes exported with per-process gauges
    #[arg(long)]
    pub top_n: Option<usize>,

    /// Do not walk the kernel task's memory regions
    #[arg(long)]
    pub skip_kernel_task: bool,

    /// Do not count IPC port names per task
    #[arg(long)]
    pub no_port_counts: bool,

    /// Use the accounting name instead of recovering argv0
    #[arg(long)]
    pub no_command_recovery: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Disable internal taskshare_refresh_* metrics
    #[arg(long)]
    pub disable_telemetry: bool,

    /// Path to a simulated host snapshot (JSON) used instead of the live kernel
    #[arg(short = 't', long)]
    pub test_data_file: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run refresh passes once and print the result
    Snapshot {
        /// Number of passes
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Rows shown in table output (0 = all)
        #[arg(short = 'l', long, default_value_t = 20)]
        limit: usize,

        /// Sort order
        #[arg(long, value_enum, default_value = "private")]
        sort: SortKey,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Generate a synthetic host snapshot JSON file
    GenerateTestdata {
        /// Output file path
        #[arg(short = 'o', long, default_value = "testdata.json")]
        output: PathBuf,

        /// Number of processes to generate
        #[arg(long, default_value_t = 40)]
        processes: usize,

        /// Number of shared objects mapped across processes
        #[arg(long, default_value_t = 12)]
        shared_objects: usize,

        /// Random seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Check runtime requirements and permissions
    CheckRequirements,
}
