//! Prometheus metrics definitions for taskshare.
//!
//! Host-wide totals and the state breakdown cover every process seen in a
//! pass. Per-process gauges are only exported for the top-N processes by
//! private memory so label cardinality stays bounded.

use prometheus::{Gauge, GaugeVec, IntGauge, Opts, Registry};
use taskshare::engine::Snapshot;
use taskshare::process::{ProcessRecord, ProcessState, SortKey};

/// Collection of Prometheus metrics filled from the latest snapshot.
#[derive(Clone)]
pub struct AccountingMetrics {
    // ========== Host Memory Metrics ==========
    pub host_virtual_bytes: Gauge,
    pub host_private_bytes: Gauge,
    pub host_shared_bytes: Gauge,
    pub host_aliased_bytes: Gauge,
    pub host_framework_private_bytes: Gauge,
    pub host_memory_regions: Gauge,

    // ========== Host Process Metrics ==========
    pub host_processes: IntGauge,
    pub host_threads: IntGauge,
    pub host_max_pid: IntGauge,
    pub host_processes_by_state: GaugeVec, // labels: state

    // ========== Per-Process Metrics (top-N) ==========
    pub process_private_bytes: GaugeVec, // labels: pid, command
    pub process_shared_bytes: GaugeVec,  // labels: pid, command
    pub process_aliased_bytes: GaugeVec, // labels: pid, command
    pub process_virtual_bytes: GaugeVec, // labels: pid, command
    pub process_resident_bytes: GaugeVec, // labels: pid, command
    pub process_cpu_seconds: GaugeVec,   // labels: pid, command
    pub process_threads: GaugeVec,       // labels: pid, command

    // ========== Pass Degradation Metrics ==========
    pub pass_skipped_tasks: IntGauge,
    pub pass_zombies: IntGauge,
    pub pass_command_fallbacks: IntGauge,
    pub pass_truncated_walks: IntGauge,
    pub pass_filtered: IntGauge,
}

fn process_vec(name: &str, help: &str) -> Result<GaugeVec, prometheus::Error> {
    GaugeVec::new(Opts::new(name, help), &["pid", "command"])
}

impl AccountingMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        // ========== Host Memory Metrics ==========
        let host_virtual_bytes = Gauge::new(
            "taskshare_host_virtual_bytes",
            "Sum of corrected virtual sizes over all processes",
        )?;
        let host_private_bytes = Gauge::new(
            "taskshare_host_private_bytes",
            "Sum of private resident bytes (aliased included) over all processes",
        )?;
        let host_shared_bytes = Gauge::new(
            "taskshare_host_shared_bytes",
            "Sum of shared resident bytes over all processes",
        )?;
        let host_aliased_bytes = Gauge::new(
            "taskshare_host_aliased_bytes",
            "Resident bytes of shared objects mapped by a single task",
        )?;
        let host_framework_private_bytes = Gauge::new(
            "taskshare_host_framework_private_bytes",
            "Private resident bytes inside the system shared segment",
        )?;
        let host_memory_regions = Gauge::new(
            "taskshare_host_memory_regions",
            "Memory regions classified during the last pass",
        )?;

        // ========== Host Process Metrics ==========
        let host_processes = IntGauge::new(
            "taskshare_host_processes",
            "Processes inspected during the last pass",
        )?;
        let host_threads = IntGauge::new(
            "taskshare_host_threads",
            "Threads counted during the last pass",
        )?;
        let host_max_pid = IntGauge::new("taskshare_host_max_pid", "Highest pid seen")?;
        let host_processes_by_state = GaugeVec::new(
            Opts::new(
                "taskshare_host_processes_by_state",
                "Processes per dominant run state",
            ),
            &["state"],
        )?;

        // ========== Per-Process Metrics (top-N) ==========
        let process_private_bytes = process_vec(
            "taskshare_process_private_bytes",
            "Private resident bytes of the process, aliased included",
        )?;
        let process_shared_bytes = process_vec(
            "taskshare_process_shared_bytes",
            "Shared resident bytes of the process",
        )?;
        let process_aliased_bytes = process_vec(
            "taskshare_process_aliased_bytes",
            "Resident bytes of objects only this process maps",
        )?;
        let process_virtual_bytes = process_vec(
            "taskshare_process_virtual_bytes",
            "Virtual size of the process after shared segment correction",
        )?;
        let process_resident_bytes = process_vec(
            "taskshare_process_resident_bytes",
            "Resident size reported by the task",
        )?;
        let process_cpu_seconds = process_vec(
            "taskshare_process_cpu_seconds",
            "User and system time of the process, idle threads excluded",
        )?;
        let process_threads = process_vec(
            "taskshare_process_threads",
            "Threads of the process",
        )?;

        // ========== Pass Degradation Metrics ==========
        let pass_skipped_tasks = IntGauge::new(
            "taskshare_pass_skipped_tasks",
            "Tasks dropped in the last pass because their pid could not be resolved",
        )?;
        let pass_zombies = IntGauge::new(
            "taskshare_pass_zombies",
            "Processes that could not be inspected in the last pass",
        )?;
        let pass_command_fallbacks = IntGauge::new(
            "taskshare_pass_command_fallbacks",
            "Commands that fell back to the accounting name in the last pass",
        )?;
        let pass_truncated_walks = IntGauge::new(
            "taskshare_pass_truncated_region_walks",
            "Region walks stopped early in the last pass",
        )?;
        let pass_filtered = IntGauge::new(
            "taskshare_pass_filtered_processes",
            "Processes removed by the include/exclude filter in the last pass",
        )?;

        // ========== Register All Metrics ==========
        registry.register(Box::new(host_virtual_bytes.clone()))?;
        registry.register(Box::new(host_private_bytes.clone()))?;
        registry.register(Box::new(host_shared_bytes.clone()))?;
        registry.register(Box::new(host_aliased_bytes.clone()))?;
        registry.register(Box::new(host_framework_private_bytes.clone()))?;
        registry.register(Box::new(host_memory_regions.clone()))?;

        registry.register(Box::new(host_processes.clone()))?;
        registry.register(Box::new(host_threads.clone()))?;
        registry.register(Box::new(host_max_pid.clone()))?;
        registry.register(Box::new(host_processes_by_state.clone()))?;

        registry.register(Box::new(process_private_bytes.clone()))?;
        registry.register(Box::new(process_shared_bytes.clone()))?;
        registry.register(Box::new(process_aliased_bytes.clone()))?;
        registry.register(Box::new(process_virtual_bytes.clone()))?;
        registry.register(Box::new(process_resident_bytes.clone()))?;
        registry.register(Box::new(process_cpu_seconds.clone()))?;
        registry.register(Box::new(process_threads.clone()))?;

        registry.register(Box::new(pass_skipped_tasks.clone()))?;
        registry.register(Box::new(pass_zombies.clone()))?;
        registry.register(Box::new(pass_command_fallbacks.clone()))?;
        registry.register(Box::new(pass_truncated_walks.clone()))?;
        registry.register(Box::new(pass_filtered.clone()))?;

        Ok(Self {
            host_virtual_bytes,
            host_private_bytes,
            host_shared_bytes,
            host_aliased_bytes,
            host_framework_private_bytes,
            host_memory_regions,
            host_processes,
            host_threads,
            host_max_pid,
            host_processes_by_state,
            process_private_bytes,
            process_shared_bytes,
            process_aliased_bytes,
            process_virtual_bytes,
            process_resident_bytes,
            process_cpu_seconds,
            process_threads,
            pass_skipped_tasks,
            pass_zombies,
            pass_command_fallbacks,
            pass_truncated_walks,
            pass_filtered,
        })
    }

    /// Resets the per-process families so exited processes disappear.
    pub fn reset_process_metrics(&self) {
        self.process_private_bytes.reset();
        self.process_shared_bytes.reset();
        self.process_aliased_bytes.reset();
        self.process_virtual_bytes.reset();
        self.process_resident_bytes.reset();
        self.process_cpu_seconds.reset();
        self.process_threads.reset();
    }

    /// Copies a snapshot into the gauges.
    pub fn observe(&self, snapshot: &Snapshot, top_n: usize) {
        let totals = &snapshot.totals;
        self.host_virtual_bytes.set(totals.virtual_bytes as f64);
        self.host_private_bytes.set(totals.private_bytes as f64);
        self.host_shared_bytes.set(totals.shared_bytes as f64);
        self.host_aliased_bytes.set(totals.aliased_bytes as f64);
        self.host_framework_private_bytes
            .set(totals.framework_private_bytes as f64);
        self.host_memory_regions.set(totals.memory_regions as f64);

        self.host_processes.set(totals.processes as i64);
        self.host_threads.set(totals.threads as i64);
        self.host_max_pid.set(totals.max_pid as i64);
        for state in ProcessState::ALL {
            self.host_processes_by_state
                .with_label_values(&[state.name()])
                .set(snapshot.count(state) as f64);
        }

        let counters = &snapshot.counters;
        self.pass_skipped_tasks.set(counters.skipped_tasks as i64);
        self.pass_zombies.set(counters.zombies as i64);
        self.pass_command_fallbacks
            .set(counters.command_fallbacks as i64);
        self.pass_truncated_walks.set(counters.truncated_walks as i64);
        self.pass_filtered.set(counters.filtered as i64);

        self.reset_process_metrics();
        let mut ranked: Vec<&ProcessRecord> = snapshot.records.iter().collect();
        SortKey::Private.sort(&mut ranked);
        for record in ranked.into_iter().take(top_n) {
            self.observe_process(record);
        }
    }

    fn observe_process(&self, record: &ProcessRecord) {
        let pid = record.pid.to_string();
        let labels = [pid.as_str(), record.command.as_str()];
        self.process_private_bytes
            .with_label_values(&labels)
            .set(record.private_bytes as f64);
        self.process_shared_bytes
            .with_label_values(&labels)
            .set(record.shared_bytes as f64);
        self.process_aliased_bytes
            .with_label_values(&labels)
            .set(record.aliased_bytes as f64);
        self.process_virtual_bytes
            .with_label_values(&labels)
            .set(record.virtual_size as f64);
        self.process_resident_bytes
            .with_label_values(&labels)
            .set(record.resident_size as f64);
        self.process_cpu_seconds
            .with_label_values(&labels)
            .set(record.total_time.as_secs_f64());
        self.process_threads
            .with_label_values(&labels)
            .set(record.threads as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;
    use taskshare::engine::{Engine, EngineOptions};
    use taskshare::kernel::simulated::{HostSnapshot, SimProcess, SimRegion};
    use taskshare::kernel::{ShareMode, SimulatedKernel};

    #[test]
    fn test_only_top_n_processes_are_labelled() {
        let processes = (1..=5)
            .map(|pid| {
                SimProcess::new(pid, &format!("proc{}", pid)).with_region(
                    SimRegion::new(0x1000, 4096 * pid as u64, ShareMode::Private)
                        .resident(pid as u32, 0),
                )
            })
            .collect();
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(processes));
        let snapshot = Engine::new(EngineOptions {
            recover_commands: false,
            ..EngineOptions::default()
        })
        .refresh(&kernel)
        .expect("refresh");

        let registry = Registry::new();
        let metrics = AccountingMetrics::new(&registry).expect("metrics");
        metrics.observe(&snapshot, 2);

        assert_eq!(metrics.host_processes.get(), 5);
        let families = metrics.process_private_bytes.collect();
        assert_eq!(families[0].get_metric().len(), 2);
        assert_eq!(
            metrics
                .process_private_bytes
                .with_label_values(&["5", "proc5"])
                .get(),
            5.0 * 4096.0
        );
    }
}
