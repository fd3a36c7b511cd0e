//! Process enumeration through processor sets.
//!
//! Every task the host's processor sets know about is mapped back to a pid
//! and its BSD record. Task handles obtained here are released before
//! returning; detailed inspection re-acquires them by pid.

use tracing::debug;

use crate::kernel::{BsdProcInfo, HostKernel, KernelError, ProcessorSetHandle, TaskHandle};

/// Processes found by one enumeration.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub processes: Vec<BsdProcInfo>,
    /// Tasks whose pid or BSD record could not be read.
    pub skipped_tasks: u64,
    /// Processes whose BSD slot was already empty.
    pub gone: u64,
}

/// Lists every process on the host.
///
/// Failing to obtain the processor sets or their task lists is an error;
/// everything below that only skips the affected task.
pub fn enumerate_processes(kernel: &dyn HostKernel) -> Result<Enumeration, KernelError> {
    let sets = kernel.processor_sets()?;
    let self_task = kernel.self_task();
    let mut enumeration = Enumeration::default();
    let mut failure = None;

    for pset in sets {
        if failure.is_none() {
            if let Err(e) = visit_processor_set(kernel, pset, self_task, &mut enumeration) {
                failure = Some(e);
            }
        }
        kernel.release_processor_set(pset);
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(enumeration),
    }
}

fn visit_processor_set(
    kernel: &dyn HostKernel,
    pset: ProcessorSetHandle,
    self_task: TaskHandle,
    enumeration: &mut Enumeration,
) -> Result<(), KernelError> {
    let tasks = kernel.processor_set_tasks(pset)?;
    for task in tasks {
        visit_task(kernel, task, enumeration);
        if task != self_task {
            kernel.release_task(task);
        }
    }
    Ok(())
}

fn visit_task(kernel: &dyn HostKernel, task: TaskHandle, enumeration: &mut Enumeration) {
    let pid = match kernel.pid_for_task(task) {
        Ok(pid) => pid,
        Err(e) => {
            debug!("Skipping task {}: {}", task.0, e);
            enumeration.skipped_tasks += 1;
            return;
        }
    };
    match kernel.process_info(pid) {
        Ok(info) if info.status == 0 => enumeration.gone += 1,
        Ok(info) => enumeration.processes.push(info),
        Err(e) => {
            debug!("Skipping pid {}: {}", pid, e);
            enumeration.skipped_tasks += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::simulated::{HostSnapshot, SimProcess, SimProcessorSet, SimulatedKernel};

    #[test]
    fn test_zero_processor_sets() {
        let kernel = SimulatedKernel::new(HostSnapshot::default());
        let enumeration = enumerate_processes(&kernel).expect("enumerate");
        assert!(enumeration.processes.is_empty());
        assert_eq!(enumeration.skipped_tasks, 0);
    }

    #[test]
    fn test_failed_pid_lookup_skips_task() {
        let mut dying = SimProcess::new(20, "dying");
        dying.pid_lookup_fails = true;
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
            SimProcess::new(10, "alive"),
            dying,
        ]));
        let enumeration = enumerate_processes(&kernel).expect("enumerate");
        assert_eq!(enumeration.processes.len(), 1);
        assert_eq!(enumeration.processes[0].pid, 10);
        assert_eq!(enumeration.skipped_tasks, 1);
        assert_eq!(kernel.outstanding_handles(), 0);
    }

    #[test]
    fn test_empty_bsd_slot_counts_as_gone() {
        let mut gone = SimProcess::new(30, "gone");
        gone.status = 0;
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![gone]));
        let enumeration = enumerate_processes(&kernel).expect("enumerate");
        assert!(enumeration.processes.is_empty());
        assert_eq!(enumeration.gone, 1);
    }

    #[test]
    fn test_tasks_across_processor_sets_and_self_task() {
        let mut snapshot = HostSnapshot::with_processes(vec![
            SimProcess::new(1, "launchd"),
            SimProcess::new(2, "self"),
            SimProcess::new(3, "other"),
        ]);
        snapshot.self_pid = Some(2);
        snapshot.processor_sets = vec![
            SimProcessorSet { pids: vec![1, 2] },
            SimProcessorSet { pids: vec![3] },
        ];
        let kernel = SimulatedKernel::new(snapshot);
        let enumeration = enumerate_processes(&kernel).expect("enumerate");

        let pids: Vec<_> = enumeration.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1, 2, 3]);
        assert_eq!(kernel.outstanding_handles(), 0);
        assert_eq!(kernel.self_task_releases(), 0);
    }

    #[test]
    fn test_host_denied_is_an_error() {
        let snapshot = HostSnapshot {
            host_denied: true,
            ..HostSnapshot::default()
        };
        let kernel = SimulatedKernel::new(snapshot);
        assert!(enumerate_processes(&kernel).is_err());
    }
}
