//! Kernel access layer.
//!
//! The accounting engine talks to the running kernel exclusively through the
//! [`HostKernel`] trait. Two backends exist:
//! - `darwin`: live Mach/BSD calls (macOS only)
//! - `simulated`: a deterministic host loaded from a JSON snapshot
//!
//! Every call that hands out a handle has a matching `release_*` call. The
//! engine releases everything it obtains before a pass ends.

#[cfg(target_os = "macos")]
pub mod darwin;
pub mod simulated;
pub mod types;

pub use simulated::{HostSnapshot, SimulatedKernel};
pub use types::{
    ArgumentArea, ArgumentLayout, BsdProcInfo, Pid, ProcessorSetHandle, RegionBasic, RegionTop,
    RegionTopInfo, ShareMode, SharedSegment, TaskBasicInfo, TaskHandle, ThreadBasicInfo,
    ThreadHandle, ThreadRunState, TimeValue,
};

/// Errors reported by individual kernel calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("{call} failed with kern_return {code}")]
    Call { call: &'static str, code: i32 },

    #[error("insufficient privileges to obtain the host handle")]
    InsufficientPrivileges,

    #[error("no such process: {0}")]
    NoSuchProcess(Pid),

    #[error("no region at or above address {0:#x}")]
    NoMoreRegions(u64),

    #[error("unknown handle {0}")]
    UnknownHandle(u32),
}

impl KernelError {
    pub fn call(call: &'static str, code: i32) -> Self {
        KernelError::Call { call, code }
    }
}

/// The kernel calls the accounting engine depends on.
pub trait HostKernel {
    /// The caller's own task; never released.
    fn self_task(&self) -> TaskHandle;

    /// Size of a VM page in bytes.
    fn page_size(&self) -> u64;

    /// Location of the system-wide shared segment.
    fn shared_segment(&self) -> SharedSegment;

    /// Lists processor sets. Failing here means the host handle itself is
    /// unavailable with sufficient privilege.
    fn processor_sets(&self) -> Result<Vec<ProcessorSetHandle>, KernelError>;

    /// Lists the tasks of one processor set.
    fn processor_set_tasks(&self, pset: ProcessorSetHandle) -> Result<Vec<TaskHandle>, KernelError>;

    fn release_processor_set(&self, pset: ProcessorSetHandle);

    fn pid_for_task(&self, task: TaskHandle) -> Result<Pid, KernelError>;

    fn process_info(&self, pid: Pid) -> Result<BsdProcInfo, KernelError>;

    fn task_for_pid(&self, pid: Pid) -> Result<TaskHandle, KernelError>;

    fn release_task(&self, task: TaskHandle);

    fn task_basic_info(&self, task: TaskHandle) -> Result<TaskBasicInfo, KernelError>;

    /// Returns the region containing `address`, or the next one above it.
    fn region_top_info(&self, task: TaskHandle, address: u64) -> Result<RegionTop, KernelError>;

    /// 64-bit basic info for the region containing `address`.
    fn region_basic_info(&self, task: TaskHandle, address: u64)
        -> Result<RegionBasic, KernelError>;

    fn task_threads(&self, task: TaskHandle) -> Result<Vec<ThreadHandle>, KernelError>;

    fn thread_basic_info(&self, thread: ThreadHandle) -> Result<ThreadBasicInfo, KernelError>;

    fn release_thread(&self, thread: ThreadHandle);

    /// Number of port names in the task's IPC space.
    fn port_count(&self, task: TaskHandle) -> Result<u32, KernelError>;

    /// Raw kernel argument area for `pid`, tagged with its layout.
    fn process_arguments(&self, pid: Pid) -> Result<ArgumentArea, KernelError>;
}

#[cfg(target_os = "macos")]
pub use darwin::MachKernel;
