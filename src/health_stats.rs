//! Health statistics for the accounting service.
//!
//! Tracks refresh pass performance, per-pass degradation counters and HTTP
//! request figures, and renders them as the plain-text `/health` table.

use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::engine::PassCounters;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Lock-protected running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// `(last, avg, max, min, count)`
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Request timestamps of the last ten minutes.
pub struct RequestTimestamps {
    inner: Mutex<VecDeque<Instant>>,
}

impl Default for RequestTimestamps {
    fn default() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(256)),
        }
    }
}

impl RequestTimestamps {
    const WINDOW: Duration = Duration::from_secs(600);

    pub fn record(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            let now = Instant::now();
            guard.push_back(now);
            while guard
                .front()
                .is_some_and(|&t| now.duration_since(t) > Self::WINDOW)
            {
                guard.pop_front();
            }
        }
    }

    pub fn count_last_minute(&self) -> u64 {
        if let Ok(guard) = self.inner.lock() {
            let now = Instant::now();
            guard
                .iter()
                .filter(|&&t| now.duration_since(t) <= Duration::from_secs(60))
                .count() as u64
        } else {
            0
        }
    }
}

/// Service health figures.
pub struct HealthStats {
    // Refresh passes
    pub processes: Stat,
    pub pass_duration_seconds: Stat,
    pub alias_entries: Stat,
    pub total_passes: AtomicU64,
    pub pass_success_count: AtomicU64,
    pub pass_failure_count: AtomicU64,
    pub skipped_passes: AtomicU64,

    // Degradation, summed over all passes
    pub skipped_tasks: AtomicU64,
    pub zombies: AtomicU64,
    pub command_fallbacks: AtomicU64,
    pub truncated_walks: AtomicU64,

    // HTTP server
    pub http_request_timestamps: RequestTimestamps,
    pub request_duration_ms: Stat,
    pub metrics_endpoint_calls: AtomicU64,
    pub serialization_duration_ms: Stat,
    pub lock_wait_duration_ms: Stat,

    pub start_time: Instant,
    pub last_pass_time: StdRwLock<Option<DateTime<Utc>>>,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            processes: Stat::default(),
            pass_duration_seconds: Stat::default(),
            alias_entries: Stat::default(),
            total_passes: AtomicU64::new(0),
            pass_success_count: AtomicU64::new(0),
            pass_failure_count: AtomicU64::new(0),
            skipped_passes: AtomicU64::new(0),
            skipped_tasks: AtomicU64::new(0),
            zombies: AtomicU64::new(0),
            command_fallbacks: AtomicU64::new(0),
            truncated_walks: AtomicU64::new(0),
            http_request_timestamps: RequestTimestamps::default(),
            request_duration_ms: Stat::default(),
            metrics_endpoint_calls: AtomicU64::new(0),
            serialization_duration_ms: Stat::default(),
            lock_wait_duration_ms: Stat::default(),
            start_time: Instant::now(),
            last_pass_time: StdRwLock::new(None),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a completed pass.
    pub fn record_pass(
        &self,
        processes: u64,
        duration: Duration,
        alias_entries: usize,
        counters: &PassCounters,
    ) {
        self.processes.add_sample(processes as f64);
        self.pass_duration_seconds.add_sample(duration.as_secs_f64());
        self.alias_entries.add_sample(alias_entries as f64);
        self.total_passes.fetch_add(1, Ordering::Relaxed);
        self.pass_success_count.fetch_add(1, Ordering::Relaxed);

        self.skipped_tasks
            .fetch_add(counters.skipped_tasks, Ordering::Relaxed);
        self.zombies.fetch_add(counters.zombies, Ordering::Relaxed);
        self.command_fallbacks
            .fetch_add(counters.command_fallbacks, Ordering::Relaxed);
        self.truncated_walks
            .fetch_add(counters.truncated_walks, Ordering::Relaxed);

        if let Ok(mut guard) = self.last_pass_time.write() {
            *guard = Some(Utc::now());
        }
    }

    pub fn record_pass_failure(&self) {
        self.total_passes.fetch_add(1, Ordering::Relaxed);
        self.pass_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A timer tick found the previous pass still running.
    pub fn record_skipped_pass(&self) {
        self.skipped_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_request_timestamps.record();
    }

    pub fn record_request_duration(&self, duration_ms: f64) {
        self.request_duration_ms.add_sample(duration_ms);
    }

    pub fn record_metrics_endpoint_call(&self) {
        self.metrics_endpoint_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serialization_duration_ms(&self, duration_ms: f64) {
        self.serialization_duration_ms.add_sample(duration_ms);
    }

    pub fn record_lock_wait_duration_ms(&self, duration_ms: f64) {
        self.lock_wait_duration_ms.add_sample(duration_ms);
    }

    pub fn get_pass_success_rate(&self) -> f64 {
        let success = self.pass_success_count.load(Ordering::Relaxed);
        let failure = self.pass_failure_count.load(Ordering::Relaxed);
        let total = success + failure;
        if total == 0 {
            100.0
        } else {
            (success as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn get_last_pass_time_str(&self) -> String {
        match self.last_pass_time.read() {
            Ok(guard) => guard
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            Err(_) => "N/A".to_string(),
        }
    }

    pub fn render_table(&self) -> String {
        const LEFT: usize = 26;
        const COL: usize = 12;

        fn stat_row(out: &mut String, label: &str, stat: &Stat, precision: usize) {
            let (cur, avg, max, min, _) = stat.snapshot();
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = LEFT,
                col = COL
            )
            .ok();
        }

        fn value_row(out: &mut String, label: &str, value: String) {
            writeln!(out, "{:left$} | {:^col$}", label, value, left = LEFT, col = COL).ok();
        }

        fn section(out: &mut String, title: &str) {
            writeln!(out).ok();
            writeln!(out, "{}", title).ok();
            writeln!(out, "{}", "-".repeat(title.len() + 1)).ok();
        }

        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed).to_string();
        let mut out = String::new();

        writeln!(out, "HEALTH ENDPOINT - TASKSHARE INTERNAL STATS").ok();
        writeln!(out, "==========================================").ok();
        writeln!(out).ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = LEFT,
            col = COL
        )
        .ok();

        section(&mut out, "REFRESH PASSES");
        stat_row(&mut out, "processes", &self.processes, 0);
        stat_row(&mut out, "pass_duration (s)", &self.pass_duration_seconds, 3);
        stat_row(&mut out, "alias_table_entries", &self.alias_entries, 0);
        value_row(
            &mut out,
            "pass_success_rate (%)",
            format!("{:.1}", self.get_pass_success_rate()),
        );
        value_row(&mut out, "total_passes", load(&self.total_passes));
        value_row(&mut out, "skipped_passes", load(&self.skipped_passes));

        section(&mut out, "DEGRADED PROCESSES (TOTAL)");
        value_row(&mut out, "skipped_tasks", load(&self.skipped_tasks));
        value_row(&mut out, "zombies", load(&self.zombies));
        value_row(&mut out, "command_fallbacks", load(&self.command_fallbacks));
        value_row(&mut out, "truncated_region_walks", load(&self.truncated_walks));

        section(&mut out, "HTTP SERVER");
        stat_row(&mut out, "request_duration (ms)", &self.request_duration_ms, 2);
        stat_row(
            &mut out,
            "serialization (ms)",
            &self.serialization_duration_ms,
            2,
        );
        stat_row(&mut out, "lock_wait (ms)", &self.lock_wait_duration_ms, 2);
        value_row(
            &mut out,
            "requests_last_minute",
            self.http_request_timestamps.count_last_minute().to_string(),
        );
        value_row(&mut out, "metrics_endpoint_calls", load(&self.metrics_endpoint_calls));

        writeln!(out).ok();
        writeln!(
            out,
            "uptime: {}s | last pass: {}",
            self.get_uptime_seconds(),
            self.get_last_pass_time_str()
        )
        .ok();
        out
    }
}
