//! Thread state aggregation.
//!
//! Reduces the threads of one task to a dominant [`ProcessState`] and sums
//! their CPU time. Idle-flagged threads feed idle time only.

use std::time::Duration;
use tracing::debug;

use super::state::ProcessState;
use crate::kernel::{
    HostKernel, KernelError, TaskBasicInfo, TaskHandle, ThreadBasicInfo, ThreadRunState,
};

/// What one thread contributes to its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadObservation {
    pub run_state: ThreadRunState,
    pub sleep_time: u32,
    pub idle: bool,
    pub swapped: bool,
    pub cpu: Duration,
}

impl From<&ThreadBasicInfo> for ThreadObservation {
    fn from(info: &ThreadBasicInfo) -> Self {
        Self {
            run_state: info.run_state,
            sleep_time: info.sleep_time,
            idle: info.idle,
            swapped: info.swapped,
            cpu: info.user_time.as_duration() + info.system_time.as_duration(),
        }
    }
}

/// Aggregate over a task's threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSummary {
    pub threads: usize,
    pub state: ProcessState,
    /// Non-idle CPU time, including the task's terminated threads.
    pub total_time: Duration,
    pub idle_time: Duration,
    pub all_swapped: bool,
    pub has_idle_thread: bool,
}

impl ThreadSummary {
    /// Starting point for a task with `threads` threads and `base_time` of
    /// CPU already charged to terminated threads.
    pub fn with_thread_count(threads: usize, base_time: Duration) -> Self {
        Self {
            threads,
            state: ProcessState::Unknown,
            total_time: base_time,
            idle_time: Duration::ZERO,
            all_swapped: true,
            has_idle_thread: false,
        }
    }

    pub fn observe(&mut self, thread: &ThreadObservation) {
        if thread.idle {
            self.idle_time += thread.cpu;
            self.has_idle_thread = true;
        } else {
            self.total_time += thread.cpu;
        }
        self.state = self
            .state
            .min(ProcessState::from_thread(thread.run_state, thread.sleep_time));
        if !thread.swapped {
            self.all_swapped = false;
        }
    }
}

/// Reduces a list of observations with no base time.
pub fn reduce_threads(threads: &[ThreadObservation]) -> ThreadSummary {
    let mut summary = ThreadSummary::with_thread_count(threads.len(), Duration::ZERO);
    for thread in threads {
        summary.observe(thread);
    }
    summary
}

/// Reads every thread of `task` and reduces them.
///
/// Thread handles are released after inspection unless `task` is the
/// caller's own. Failing to list threads is returned to the caller, which
/// marks the process as a zombie.
pub fn aggregate_threads(
    kernel: &dyn HostKernel,
    task: TaskHandle,
    task_info: &TaskBasicInfo,
    is_self: bool,
) -> Result<ThreadSummary, KernelError> {
    let threads = kernel.task_threads(task)?;
    let base = task_info.user_time.as_duration() + task_info.system_time.as_duration();
    let mut summary = ThreadSummary::with_thread_count(threads.len(), base);

    for thread in threads {
        match kernel.thread_basic_info(thread) {
            Ok(info) => summary.observe(&ThreadObservation::from(&info)),
            Err(e) => debug!("Skipping thread {}: {}", thread.0, e),
        }
        if !is_self {
            kernel.release_thread(thread);
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(run_state: ThreadRunState, sleep_time: u32) -> ThreadObservation {
        ThreadObservation {
            run_state,
            sleep_time,
            idle: false,
            swapped: false,
            cpu: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_running_thread_dominates() {
        let summary = reduce_threads(&[
            thread(ThreadRunState::Waiting, 5),
            thread(ThreadRunState::Running, 0),
            thread(ThreadRunState::Stopped, 0),
        ]);
        assert_eq!(summary.state, ProcessState::Running);
        assert_eq!(summary.threads, 3);
    }

    #[test]
    fn test_short_sleeper_beats_idle_sleeper() {
        let summary = reduce_threads(&[
            thread(ThreadRunState::Waiting, 30),
            thread(ThreadRunState::Waiting, 10),
        ]);
        assert_eq!(summary.state, ProcessState::Sleeping);

        let summary = reduce_threads(&[thread(ThreadRunState::Waiting, 30)]);
        assert_eq!(summary.state, ProcessState::Idle);
    }

    #[test]
    fn test_idle_threads_only_feed_idle_time() {
        let mut idle = thread(ThreadRunState::Running, 0);
        idle.idle = true;
        idle.cpu = Duration::from_secs(5);
        let busy = thread(ThreadRunState::Waiting, 1);

        let summary = reduce_threads(&[idle, busy]);
        assert_eq!(summary.idle_time, Duration::from_secs(5));
        assert_eq!(summary.total_time, Duration::from_millis(10));
        assert!(summary.has_idle_thread);
    }

    #[test]
    fn test_all_swapped_requires_every_thread() {
        let mut a = thread(ThreadRunState::Waiting, 40);
        a.swapped = true;
        let b = thread(ThreadRunState::Waiting, 40);
        assert!(reduce_threads(&[a]).all_swapped);
        assert!(!reduce_threads(&[a, b]).all_swapped);
    }

    #[test]
    fn test_no_threads_is_unknown() {
        let summary = reduce_threads(&[]);
        assert_eq!(summary.state, ProcessState::Unknown);
        assert_eq!(summary.threads, 0);
    }
}
