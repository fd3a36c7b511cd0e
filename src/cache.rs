//! Cache of the latest refresh pass.
//!
//! This module provides the `SnapshotCache` structure served by the HTTP
//! handlers between refresh passes, along with metadata about the cache state.

use std::sync::Arc;
use std::time::Instant;
use taskshare::engine::Snapshot;

/// Latest snapshot with update timing information.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    /// `None` until the first pass has completed.
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_updated: Option<Instant>,
    pub update_duration_seconds: f64,
    pub update_success: bool,
    pub is_updating: bool,
}

impl SnapshotCache {
    /// Seconds since the last completed pass.
    pub fn age_seconds(&self) -> Option<f64> {
        self.last_updated.map(|t| t.elapsed().as_secs_f64())
    }
}
