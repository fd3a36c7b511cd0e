//! HTTP endpoint handlers for the service.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/`: Plain-text index
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Health check endpoint
//! - `/processes`: Latest process records as JSON
//! - `/history`: Host samples as JSON

pub mod health;
pub mod history;
pub mod metrics;
pub mod processes;
pub mod root;

// Re-export handlers
pub use health::health_handler;
pub use history::history_handler;
pub use metrics::metrics_handler;
pub use processes::processes_handler;
pub use root::root_handler;
