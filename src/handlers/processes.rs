//! Process listing endpoint.
//!
//! Serves the records of the latest pass as JSON, sorted and optionally
//! limited by query parameters.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use taskshare::engine::{HostTotals, PassCounters};
use taskshare::process::{ProcessRecord, SortKey};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Query parameters for `/processes`.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessQuery {
    #[serde(default)]
    pub sort: SortKey,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct ProcessListing<'a> {
    taken_at: String,
    sort: SortKey,
    totals: &'a HostTotals,
    counters: &'a PassCounters,
    processes: Vec<&'a ProcessRecord>,
}

/// Handler for the /processes endpoint.
#[instrument(skip(state))]
pub async fn processes_handler(
    State(state): State<SharedState>,
    Query(query): Query<ProcessQuery>,
) -> impl IntoResponse {
    debug!("Processing /processes request");
    let start = Instant::now();
    state.health_stats.record_http_request();

    let snapshot = {
        let cache = state.cache.read().await;
        cache.snapshot.clone()
    };
    let Some(snapshot) = snapshot else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No refresh pass has completed yet",
        )
            .into_response();
    };

    let mut processes: Vec<&ProcessRecord> = snapshot.records.iter().collect();
    query.sort.sort(&mut processes);
    if let Some(limit) = query.limit {
        processes.truncate(limit);
    }

    let listing = ProcessListing {
        taken_at: snapshot.taken_at.to_rfc3339(),
        sort: query.sort,
        totals: &snapshot.totals,
        counters: &snapshot.counters,
        processes,
    };
    let response = Json(listing).into_response();

    state
        .health_stats
        .record_request_duration(start.elapsed().as_secs_f64() * 1000.0);
    response
}
