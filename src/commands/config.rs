//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("taskshare.yaml"));

    let mut content = render_config(&config, &format)?;
    if commented && matches!(format, ConfigFormat::Yaml) {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# taskshare Configuration
# ========================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"                  # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                       # HTTP port
#
# Refresh Passes
# --------------
# refresh_interval_seconds: 5      # Seconds between passes
# include_kernel_task: true        # Classify the regions of pid 0
# collect_port_counts: true        # Count IPC port names per task
# recover_commands: true           # Read argv0 instead of the accounting name
# command_width: 16                # Maximum command width (>= 4)
#
# Reporting
# ---------
# include_names: null              # Report only commands containing one of these
# exclude_names: null              # Never report commands containing one of these
# top_n: 10                        # Processes exported with per-process gauges
# history_capacity: 120            # Host samples kept for /history (>= 2)
#
# Feature Flags
# -------------
# enable_health: true              # Enable /health endpoint
# enable_telemetry: true           # Enable taskshare_refresh_* metrics
#
# Logging
# -------
# log_level: "info"                # off, error, warn, info, debug, trace
#
# Offline Mode
# ------------
# test_data_file: null             # JSON host snapshot used instead of the live kernel
"#;

    format!("{comments}\n{yaml}")
}
