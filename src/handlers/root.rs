//! Root endpoint handler.
//!
//! Lists the available endpoints with the service version and uptime.

use axum::extract::State;
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> String {
    debug!("Processing / request");
    state.health_stats.record_http_request();

    let uptime_secs = state.start_time.elapsed().as_secs();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;

    let mut out = String::new();
    writeln!(out, "taskshare {}", env!("CARGO_PKG_VERSION")).ok();
    writeln!(out, "uptime: {}h {}m {}s", hours, minutes, seconds).ok();
    writeln!(out).ok();
    writeln!(out, "Available endpoints:").ok();
    writeln!(out, "  /metrics    Prometheus metrics").ok();
    if state.config.enable_health.unwrap_or(true) {
        writeln!(out, "  /health     Service health and refresh statistics").ok();
    }
    writeln!(
        out,
        "  /processes  Process records as JSON (?sort=private|shared|aliased|cpu|pid&limit=N)"
    )
    .ok();
    writeln!(out, "  /history    Host samples as JSON, oldest first").ok();
    out
}
