//! History endpoint.
//!
//! Serves the host samples kept by the refresher, oldest first.

use axum::{extract::State, Json};
use serde::Serialize;
use taskshare::history::HostSample;
use tracing::{debug, instrument};

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HistoryResponse {
    pub capacity: usize,
    pub estimated_bytes: usize,
    pub samples: Vec<HostSample>,
}

/// Handler for the /history endpoint.
#[instrument(skip(state))]
pub async fn history_handler(State(state): State<SharedState>) -> Json<HistoryResponse> {
    debug!("Processing /history request");
    state.health_stats.record_http_request();

    let response = match state.history.lock() {
        Ok(history) => HistoryResponse {
            capacity: history.samples().capacity(),
            estimated_bytes: history.estimated_bytes(),
            samples: history.samples().to_vec(),
        },
        Err(_) => HistoryResponse {
            capacity: 0,
            estimated_bytes: 0,
            samples: Vec::new(),
        },
    };
    Json(response)
}
