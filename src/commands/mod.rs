//! CLI command implementations for taskshare.
//!
//! This module provides implementations for all CLI subcommands:
//! - `snapshot`: One-shot refresh passes printed to stdout
//! - `config`: Configuration file generation
//! - `generate`: Synthetic host snapshot generation
//! - `check`: Runtime requirement validation

pub mod check;
pub mod config;
pub mod generate;
pub mod snapshot;

// Re-export command functions
pub use check::command_check_requirements;
pub use config::command_config;
pub use generate::command_generate_testdata;
pub use snapshot::command_snapshot;
