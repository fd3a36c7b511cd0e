//! Integration tests for health statistics tracking.

use std::sync::atomic::Ordering;
use std::time::Duration;
use taskshare::engine::PassCounters;
use taskshare::health_stats::HealthStats;

fn counters(zombies: u64, fallbacks: u64) -> PassCounters {
    PassCounters {
        zombies,
        command_fallbacks: fallbacks,
        ..PassCounters::default()
    }
}

#[test]
fn test_health_stats_basic() {
    let stats = HealthStats::new();

    stats.record_pass(120, Duration::from_millis(40), 300, &counters(2, 1));
    stats.record_pass(130, Duration::from_millis(60), 310, &counters(1, 0));

    assert_eq!(stats.total_passes.load(Ordering::Relaxed), 2);
    assert_eq!(stats.pass_success_count.load(Ordering::Relaxed), 2);
    assert_eq!(stats.zombies.load(Ordering::Relaxed), 3);
    assert_eq!(stats.command_fallbacks.load(Ordering::Relaxed), 1);

    let (current, avg, max, min, count) = stats.processes.snapshot();
    assert_eq!(current, 130.0);
    assert_eq!(avg, 125.0);
    assert_eq!(max, 130.0);
    assert_eq!(min, 120.0);
    assert_eq!(count, 2);
}

#[test]
fn test_pass_success_rate() {
    let stats = HealthStats::new();
    for _ in 0..3 {
        stats.record_pass(10, Duration::from_millis(5), 0, &PassCounters::default());
    }
    stats.record_pass_failure();

    assert_eq!(stats.get_pass_success_rate(), 75.0);
    assert_eq!(stats.total_passes.load(Ordering::Relaxed), 4);
}

#[test]
fn test_skipped_passes_do_not_affect_success_rate() {
    let stats = HealthStats::new();
    stats.record_pass(10, Duration::from_millis(5), 0, &PassCounters::default());
    stats.record_skipped_pass();
    stats.record_skipped_pass();

    assert_eq!(stats.skipped_passes.load(Ordering::Relaxed), 2);
    assert_eq!(stats.total_passes.load(Ordering::Relaxed), 1);
    assert_eq!(stats.get_pass_success_rate(), 100.0);
}

#[test]
fn test_last_pass_time_is_set() {
    let stats = HealthStats::new();
    assert_eq!(stats.get_last_pass_time_str(), "N/A");
    stats.record_pass(1, Duration::from_millis(1), 0, &PassCounters::default());
    assert_ne!(stats.get_last_pass_time_str(), "N/A");
}

#[test]
fn test_render_table() {
    let stats = HealthStats::new();
    stats.record_pass(42, Duration::from_millis(12), 7, &counters(0, 3));
    stats.record_http_request();
    stats.record_metrics_endpoint_call();

    let table = stats.render_table();
    assert!(table.contains("HEALTH ENDPOINT"));
    assert!(table.contains("REFRESH PASSES"));
    assert!(table.contains("DEGRADED PROCESSES"));
    assert!(table.contains("HTTP SERVER"));
    assert!(table.contains("command_fallbacks"));
    assert!(table.contains("uptime:"));
}
