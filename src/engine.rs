//! Accounting engine.
//!
//! One [`Engine`] owns the alias table and turns a [`HostKernel`] into a
//! [`Snapshot`] of every process on each call to [`Engine::refresh`]. A pass
//! runs to completion or fails as a whole when the host itself cannot be
//! read; processes that vanish mid-pass degrade to placeholder records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::alias_table::AliasTable;
use crate::kernel::{BsdProcInfo, HostKernel, KernelError, SharedSegment, TaskHandle};
use crate::process::{
    aggregate_threads, classify_regions, enumerate_processes, recover_command, ProcessFilter,
    ProcessRecord, ProcessState,
};

/// The only error a pass surfaces.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cannot enumerate host tasks: {0}")]
    HostAccess(#[source] KernelError),
}

/// Knobs for one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Walk the regions of pid 0 as well.
    pub include_kernel_task: bool,
    pub collect_port_counts: bool,
    /// When false the accounting name is used as the command.
    pub recover_commands: bool,
    pub command_width: usize,
    pub filter: ProcessFilter,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            include_kernel_task: true,
            collect_port_counts: true,
            recover_commands: true,
            command_width: 16,
            filter: ProcessFilter::default(),
        }
    }
}

/// Host-wide sums over every inspected process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostTotals {
    pub virtual_bytes: u64,
    pub private_bytes: u64,
    pub shared_bytes: u64,
    pub aliased_bytes: u64,
    pub framework_private_bytes: u64,
    pub memory_regions: u64,
    pub threads: u64,
    pub processes: u64,
    pub max_pid: i32,
}

/// What went wrong, per process, during one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassCounters {
    /// Tasks dropped because their pid or BSD record was unreadable.
    pub skipped_tasks: u64,
    /// Processes that turned into zombies during inspection.
    pub zombies: u64,
    pub command_fallbacks: u64,
    /// Region walks cut short by a failed lookup.
    pub truncated_walks: u64,
    /// Records removed by the process filter.
    pub filtered: u64,
}

/// Result of one refresh pass.
///
/// Totals and the state breakdown cover every process; `records` only holds
/// the ones admitted by the filter, sorted by pid.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub records: Vec<ProcessRecord>,
    /// Process count per [`ProcessState`], indexed by severity.
    pub state_counts: [usize; 8],
    pub totals: HostTotals,
    pub counters: PassCounters,
    pub duration: Duration,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn count(&self, state: ProcessState) -> usize {
        self.state_counts[state.severity()]
    }

    pub fn running(&self) -> usize {
        self.count(ProcessState::Running)
    }

    pub fn find(&self, pid: i32) -> Option<&ProcessRecord> {
        self.records
            .binary_search_by_key(&pid, |r| r.pid)
            .ok()
            .map(|i| &self.records[i])
    }
}

/// Refresh driver owning the alias table.
pub struct Engine {
    options: EngineOptions,
    table: AliasTable,
    passes: u64,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            table: AliasTable::new(),
            passes: 0,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn alias_table(&self) -> &AliasTable {
        &self.table
    }

    /// Completed passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Runs one full enumeration pass.
    pub fn refresh(&mut self, kernel: &dyn HostKernel) -> Result<Snapshot, EngineError> {
        let start = Instant::now();
        self.table.reset();

        let enumeration = enumerate_processes(kernel).map_err(EngineError::HostAccess)?;
        debug!(
            "Enumerated {} processes ({} skipped, {} gone)",
            enumeration.processes.len(),
            enumeration.skipped_tasks,
            enumeration.gone
        );

        let page_size = kernel.page_size();
        let segment = kernel.shared_segment();
        let mut snapshot = Snapshot {
            counters: PassCounters {
                skipped_tasks: enumeration.skipped_tasks,
                ..PassCounters::default()
            },
            ..Snapshot::default()
        };
        snapshot.state_counts[ProcessState::Zombie.severity()] += enumeration.gone as usize;

        let mut records = Vec::with_capacity(enumeration.processes.len());
        for info in &enumeration.processes {
            let record = self.inspect(kernel, info, page_size, &segment, &mut snapshot);
            snapshot.state_counts[record.state.severity()] += 1;
            if record.is_zombie() {
                snapshot.counters.zombies += 1;
            }

            let totals = &mut snapshot.totals;
            totals.virtual_bytes += record.virtual_size;
            totals.private_bytes += record.private_bytes;
            totals.shared_bytes += record.shared_bytes;
            totals.aliased_bytes += record.aliased_bytes;
            totals.memory_regions += record.memory_objects;
            totals.threads += record.threads as u64;
            totals.processes += 1;
            totals.max_pid = totals.max_pid.max(record.pid);
            records.push(record);
        }

        let before = records.len();
        records.retain(|r| self.options.filter.matches(r));
        snapshot.counters.filtered = (before - records.len()) as u64;
        records.sort_by_key(|r| r.pid);
        snapshot.records = records;

        if snapshot.counters.skipped_tasks > 0 || snapshot.counters.zombies > 0 {
            debug!(
                "Pass degraded: {} tasks skipped, {} zombies",
                snapshot.counters.skipped_tasks, snapshot.counters.zombies
            );
        }
        if snapshot.totals.processes == 0 {
            warn!("Refresh pass found no processes");
        }

        self.passes += 1;
        snapshot.duration = start.elapsed();
        snapshot.taken_at = Utc::now();

        info!(
            "Refresh pass {} completed: {} processes ({} reported), {:.2}ms",
            self.passes,
            snapshot.totals.processes,
            snapshot.records.len(),
            snapshot.duration.as_secs_f64() * 1000.0
        );
        Ok(snapshot)
    }

    fn inspect(
        &mut self,
        kernel: &dyn HostKernel,
        info: &BsdProcInfo,
        page_size: u64,
        segment: &SharedSegment,
        snapshot: &mut Snapshot,
    ) -> ProcessRecord {
        let mut record = ProcessRecord::from_bsd(info);

        match kernel.task_for_pid(info.pid) {
            Ok(task) => {
                let is_self = task == kernel.self_task();
                self.inspect_task(kernel, task, is_self, page_size, segment, &mut record, snapshot);
                if !is_self {
                    kernel.release_task(task);
                }
            }
            Err(e) => {
                debug!("No task for pid {}: {}", info.pid, e);
                record.mark_zombie();
            }
        }

        if self.options.recover_commands {
            let command =
                recover_command(kernel, info.pid, &info.comm, self.options.command_width);
            if !command.recovered {
                snapshot.counters.command_fallbacks += 1;
            }
            record.command = command.text;
        }
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn inspect_task(
        &mut self,
        kernel: &dyn HostKernel,
        task: TaskHandle,
        is_self: bool,
        page_size: u64,
        segment: &SharedSegment,
        record: &mut ProcessRecord,
        snapshot: &mut Snapshot,
    ) {
        let task_info = match kernel.task_basic_info(task) {
            Ok(task_info) => task_info,
            Err(e) => {
                debug!("No task info for pid {}: {}", record.pid, e);
                record.mark_zombie();
                return;
            }
        };
        record.virtual_size = task_info.virtual_size;
        record.resident_size = task_info.resident_size;

        if record.pid != 0 || self.options.include_kernel_task {
            let regions =
                classify_regions(kernel, task, record.pid, &mut self.table, page_size, segment);
            record.virtual_size = regions.corrected_virtual_size(record.virtual_size, segment);
            record.private_bytes = regions.private_bytes + regions.aliased_bytes;
            record.shared_bytes = regions.shared_bytes;
            record.aliased_bytes = regions.aliased_bytes;
            record.virtual_private_bytes = regions.virtual_private_bytes;
            record.memory_objects = regions.region_count;
            snapshot.totals.framework_private_bytes += regions.framework_private_bytes;
            if regions.stopped_early {
                snapshot.counters.truncated_walks += 1;
            }
        }

        record.total_time = task_info.user_time.as_duration() + task_info.system_time.as_duration();
        match aggregate_threads(kernel, task, &task_info, is_self) {
            Ok(summary) => {
                record.state = summary.state;
                record.threads = summary.threads;
                record.total_time = summary.total_time;
                record.idle_time = summary.idle_time;
                record.all_swapped = summary.all_swapped;
                record.has_idle_thread = summary.has_idle_thread;
            }
            Err(e) => {
                debug!("No thread list for pid {}: {}", record.pid, e);
                record.mark_zombie();
                return;
            }
        }

        if self.options.collect_port_counts {
            record.ports = match kernel.port_count(task) {
                Ok(count) => Some(count),
                Err(e) => {
                    debug!("Port count for pid {} unavailable: {}", record.pid, e);
                    None
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::simulated::{HostSnapshot, SimProcess, SimRegion, SimThread, SimulatedKernel};
    use crate::kernel::{ShareMode, ThreadRunState};

    #[test]
    fn test_zero_processor_sets_yield_empty_snapshot() {
        let kernel = SimulatedKernel::new(HostSnapshot::default());
        let mut engine = Engine::new(EngineOptions::default());
        let snapshot = engine.refresh(&kernel).expect("refresh");
        assert!(snapshot.records.is_empty());
        assert_eq!(snapshot.totals, HostTotals::default());
    }

    #[test]
    fn test_denied_host_is_fatal() {
        let kernel = SimulatedKernel::new(HostSnapshot {
            host_denied: true,
            ..HostSnapshot::default()
        });
        let mut engine = Engine::new(EngineOptions::default());
        assert!(matches!(
            engine.refresh(&kernel),
            Err(EngineError::HostAccess(KernelError::InsufficientPrivileges))
        ));
    }

    #[test]
    fn test_kernel_task_can_be_left_out() {
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![SimProcess::new(
            0,
            "kernel_task",
        )
        .with_region(SimRegion::new(0x1000, 4096, ShareMode::Private).resident(1, 0))
        .with_thread(SimThread::new(ThreadRunState::Running, 0))]));
        let mut engine = Engine::new(EngineOptions {
            include_kernel_task: false,
            ..EngineOptions::default()
        });
        let snapshot = engine.refresh(&kernel).expect("refresh");
        assert_eq!(snapshot.records[0].private_bytes, 0);
        assert_eq!(snapshot.records[0].state, ProcessState::Running);
    }

    #[test]
    fn test_filter_keeps_totals_host_wide() {
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
            SimProcess::new(1, "launchd")
                .with_command_line("/sbin/launchd", &["/sbin/launchd"]),
            SimProcess::new(2, "mds").with_command_line("/usr/sbin/mds", &["mds"]),
        ]));
        let mut engine = Engine::new(EngineOptions {
            filter: ProcessFilter::new(vec![], vec!["mds".to_string()]),
            ..EngineOptions::default()
        });
        let snapshot = engine.refresh(&kernel).expect("refresh");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].command, "launchd");
        assert_eq!(snapshot.totals.processes, 2);
        assert_eq!(snapshot.counters.filtered, 1);
    }
}
