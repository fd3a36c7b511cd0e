//! Configuration management for taskshare.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use taskshare::engine::EngineOptions;
use taskshare::process::ProcessFilter;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_REFRESH_INTERVAL: u64 = 5;
pub const DEFAULT_COMMAND_WIDTH: usize = 16;
pub const DEFAULT_HISTORY_CAPACITY: usize = 120;
pub const DEFAULT_TOP_N: usize = 10;

/// Effective configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Refresh passes
    #[serde(alias = "refresh-interval-seconds")]
    pub refresh_interval_seconds: Option<u64>,
    #[serde(alias = "include-kernel-task")]
    pub include_kernel_task: Option<bool>,
    #[serde(alias = "collect-port-counts")]
    pub collect_port_counts: Option<bool>,
    #[serde(alias = "recover-commands")]
    pub recover_commands: Option<bool>,
    #[serde(alias = "command-width")]
    pub command_width: Option<usize>,

    // Reporting
    pub include_names: Option<Vec<String>>,
    pub exclude_names: Option<Vec<String>>,
    /// Processes exported with per-process gauges
    #[serde(alias = "top-n")]
    pub top_n: Option<usize>,
    /// Host samples kept for /history
    #[serde(alias = "history-capacity")]
    pub history_capacity: Option<usize>,

    // Feature flags
    pub enable_health: Option<bool>,
    pub enable_telemetry: Option<bool>,

    // Logging
    pub log_level: Option<String>,

    /// Path to a JSON host snapshot (uses the simulated kernel instead of Mach)
    #[serde(alias = "test-data-file")]
    pub test_data_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            refresh_interval_seconds: Some(DEFAULT_REFRESH_INTERVAL),
            include_kernel_task: Some(true),
            collect_port_counts: Some(true),
            recover_commands: Some(true),
            command_width: Some(DEFAULT_COMMAND_WIDTH),
            include_names: None,
            exclude_names: None,
            top_n: Some(DEFAULT_TOP_N),
            history_capacity: Some(DEFAULT_HISTORY_CAPACITY),
            enable_health: Some(true),
            enable_telemetry: Some(true),
            log_level: Some("info".into()),
            test_data_file: None,
        }
    }
}

impl Config {
    /// Engine knobs derived from this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            include_kernel_task: self.include_kernel_task.unwrap_or(true),
            collect_port_counts: self.collect_port_counts.unwrap_or(true),
            recover_commands: self.recover_commands.unwrap_or(true),
            command_width: self.command_width.unwrap_or(DEFAULT_COMMAND_WIDTH),
            filter: ProcessFilter::new(
                self.include_names.clone().unwrap_or_default(),
                self.exclude_names.clone().unwrap_or_default(),
            ),
        }
    }

    pub fn refresh_interval(&self) -> u64 {
        self.refresh_interval_seconds
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(DEFAULT_TOP_N)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.refresh_interval_seconds == Some(0) {
        return Err("refresh_interval_seconds must be greater than 0".into());
    }

    if let Some(width) = cfg.command_width {
        if width < 4 {
            return Err(format!("command_width must be at least 4, got {}", width).into());
        }
    }

    if let Some(capacity) = cfg.history_capacity {
        if capacity < 2 {
            return Err(format!("history_capacity must be at least 2, got {}", capacity).into());
        }
    }

    for (key, names) in [
        ("include_names", &cfg.include_names),
        ("exclude_names", &cfg.exclude_names),
    ] {
        if names.as_ref().is_some_and(|v| v.iter().any(|n| n.is_empty())) {
            return Err(format!("{} contains an empty entry", key).into());
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace") {
            return Err(format!("Invalid log_level '{}'", level).into());
        }
    }

    if let Some(path) = &cfg.test_data_file {
        if !path.exists() {
            return Err(format!("Test data file not found: {}", path.display()).into());
        }
    }

    Ok(())
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_string()).collect()
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    if let Some(interval) = args.refresh_interval {
        config.refresh_interval_seconds = Some(interval);
    }
    if let Some(width) = args.command_width {
        config.command_width = Some(width);
    }
    if let Some(capacity) = args.history_capacity {
        config.history_capacity = Some(capacity);
    }
    if let Some(n) = args.top_n {
        config.top_n = Some(n);
    }

    if let Some(include_str) = &args.include_names {
        config.include_names = Some(split_names(include_str));
    }
    if let Some(exclude_str) = &args.exclude_names {
        config.exclude_names = Some(split_names(exclude_str));
    }

    // Engine flags
    if args.skip_kernel_task {
        config.include_kernel_task = Some(false);
    }
    if args.no_port_counts {
        config.collect_port_counts = Some(false);
    }
    if args.no_command_recovery {
        config.recover_commands = Some(false);
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_telemetry {
        config.enable_telemetry = Some(false);
    }

    if let Some(test_file) = &args.test_data_file {
        config.test_data_file = Some(test_file.clone());
    }

    Ok(config)
}

/// Configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        let defaults = [
            "/etc/taskshare/taskshare.yaml",
            "/etc/taskshare/taskshare.yml",
            "/etc/taskshare/taskshare.json",
            "./taskshare.yaml",
            "./taskshare.yml",
            "./taskshare.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_default()
    };

    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Renders configuration in the requested format
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    })
}

/// Shows configuration in requested format
pub fn show_config(
    config: &Config,
    format: ConfigFormat,
    user_config: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = render_config(config, &format)?;
    if user_config {
        println!("User configuration (effective values):");
    }
    println!("{output}");
    Ok(())
}
