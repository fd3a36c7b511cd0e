//! Refresh pass driver for the service.
//!
//! Runs one engine pass on the blocking pool and publishes the result to the
//! snapshot cache, the history buffer, the Prometheus gauges and the health
//! statistics. Used for the initial pass and by the periodic timer.

use std::sync::Arc;
use std::time::{Duration, Instant};
use taskshare::engine::{EngineError, Snapshot};
use tracing::{debug, error, info, instrument, warn};

use crate::state::SharedState;

/// Runs one pass in the blocking pool. Also returns the alias table size.
async fn run_pass(state: &SharedState) -> Result<Result<(Snapshot, usize), EngineError>, String> {
    let engine = Arc::clone(&state.engine);
    let kernel = Arc::clone(&state.kernel);

    tokio::task::spawn_blocking(move || -> Result<(Snapshot, usize), EngineError> {
        let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = engine.refresh(kernel.as_ref())?;
        Ok((snapshot, engine.alias_table().len()))
    })
    .await
    .map_err(|e| format!("refresh task panicked: {}", e))
}

async fn finish_update(state: &SharedState, success: bool) {
    let mut cache = state.cache.write().await;
    cache.is_updating = false;
    cache.update_success = success;
    state.refresh_updating.set(0.0);
    state
        .refresh_success
        .set(if success { 1.0 } else { 0.0 });
}

/// Cache update function.
///
/// A call that finds another pass in flight returns immediately and leaves
/// the previous snapshot in place.
#[instrument(skip(state))]
pub async fn update_cache(
    state: &SharedState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    {
        let mut cache = state.cache.write().await;
        if cache.is_updating {
            debug!("Refresh already in progress, serving previous snapshot");
            state.health_stats.record_skipped_pass();
            return Ok(());
        }
        cache.is_updating = true;
        state.refresh_updating.set(1.0);
    }

    debug!("Starting refresh pass");

    let (snapshot, alias_entries) = match run_pass(state).await {
        Ok(Ok(pass)) => pass,
        Ok(Err(EngineError::HostAccess(e))) => {
            error!("❌ Cannot read the host task list: {}", e);
            error!("   taskshare needs root privileges to enumerate tasks");
            std::process::exit(1);
        }
        Err(msg) => {
            error!("Refresh pass failed: {}", msg);
            state.health_stats.record_pass_failure();
            finish_update(state, false).await;
            return Err(msg.into());
        }
    };

    if let Ok(mut history) = state.history.lock() {
        history.refresh(&snapshot);
    } else {
        warn!("History lock poisoned, sample dropped");
    }

    state
        .metrics
        .observe(&snapshot, state.config.top_n());

    let pass_duration = snapshot.duration;
    let processes = snapshot.totals.processes;
    state.health_stats.record_pass(
        processes,
        pass_duration,
        alias_entries,
        &snapshot.counters,
    );

    {
        let mut cache = state.cache.write().await;
        cache.snapshot = Some(Arc::new(snapshot));
        cache.last_updated = Some(start);
        cache.update_duration_seconds = start.elapsed().as_secs_f64();
        state
            .refresh_duration
            .set(cache.update_duration_seconds);
    }
    finish_update(state, true).await;

    info!(
        "Refresh completed: {} processes, pass {:.2}ms, total {:.2}ms",
        processes,
        pass_duration.as_secs_f64() * 1000.0,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}

/// Periodic refresh loop; never returns.
pub async fn refresh_loop(state: SharedState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately and the initial pass already ran.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = update_cache(&state).await {
            warn!("Background refresh failed: {}", e);
        }
    }
}
