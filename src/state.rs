//! Application state management for the service.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background refresh task.

use prometheus::{Gauge, Registry};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use taskshare::engine::Engine;
use taskshare::health_stats::HealthStats;
use taskshare::history::HostHistory;
use taskshare::kernel::HostKernel;
use tokio::sync::RwLock;

use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::metrics::AccountingMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Kernel backend shared with blocking refresh tasks.
pub type SharedKernel = Arc<dyn HostKernel + Send + Sync>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub metrics: AccountingMetrics,
    pub scrape_duration: Gauge,
    pub refresh_duration: Gauge,
    pub refresh_success: Gauge,
    pub refresh_updating: Gauge,
    pub cache: Arc<RwLock<SnapshotCache>>,
    pub config: Arc<Config>,
    /// Only one pass may hold the engine at a time.
    pub engine: Arc<StdMutex<Engine>>,
    pub kernel: SharedKernel,
    pub history: StdMutex<HostHistory>,
    pub health_stats: Arc<HealthStats>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}
