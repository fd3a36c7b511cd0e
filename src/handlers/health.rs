//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! service health statistics as a plain-text table.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

fn format_uptime(uptime_seconds: u64) -> String {
    let uptime_hours = uptime_seconds as f64 / SECONDS_PER_HOUR;
    if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    }
}

/// Handler for the /health endpoint.
///
/// Answers 503 until the first pass has completed and after a failed pass.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.health_stats.record_http_request();

    let (status, message, age, history_len, history_cap) = {
        let cache = state.cache.read().await;
        let status = if cache.update_success && cache.snapshot.is_some() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let message = if cache.snapshot.is_none() {
            "Waiting for first refresh"
        } else if cache.is_updating {
            "OK - Refresh running"
        } else if cache.update_success {
            "OK"
        } else {
            "Refresh failed"
        };
        let (len, cap) = state
            .history
            .lock()
            .map(|h| (h.samples().len(), h.samples().capacity()))
            .unwrap_or((0, 0));
        let age = cache
            .age_seconds()
            .map(|a| format!("{:.1}s", a))
            .unwrap_or_else(|| "N/A".to_string());
        (status, message, age, len, cap)
    };

    let uptime_str = format_uptime(state.health_stats.get_uptime_seconds());
    let table = state.health_stats.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "{message}\n\nUptime: {uptime_str}\nSnapshot age: {age}\nHistory: {history_len}/{history_cap} samples\n\n{table}"
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_units() {
        assert_eq!(format_uptime(90), "1.5 minutes");
        assert_eq!(format_uptime(7200), "2.0 hours");
        assert_eq!(format_uptime(172_800), "2.0 days");
    }
}
