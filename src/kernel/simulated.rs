//! Deterministic in-memory host.
//!
//! A `SimulatedKernel` answers every [`HostKernel`] call from a `HostSnapshot`
//! loaded from JSON. It is used for offline runs (`--test-data-file`), for the
//! `generate-testdata` command and by the test suites. Every failure path the
//! engine must survive can be injected per process, per region or per thread.
//!
//! The simulated kernel hands out real, unique handle numbers and keeps track
//! of the ones that were never released, so leaks show up in tests.

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::types::{
    ArgumentArea, ArgumentLayout, BsdProcInfo, Pid, ProcessorSetHandle, RegionBasic, RegionTop,
    RegionTopInfo, ShareMode, SharedSegment, TaskBasicInfo, TaskHandle, ThreadBasicInfo,
    ThreadHandle, ThreadRunState, TimeValue,
};
use super::{HostKernel, KernelError};

/// Handle number reserved for the caller's own task.
const SELF_TASK: u32 = 1;

/// Threads of the caller's own task get fixed handle numbers from here up.
/// They are the same on every call and are never tracked, since the caller
/// never releases them.
const SELF_THREAD_BASE: u32 = 0x8000_0000;

/// `KERN_FAILURE`, reported for injected failures.
const KERN_FAILURE: i32 = 5;

/// `SRUN` from `sys/proc.h`.
const SRUN: u32 = 2;

/// Errors while loading or saving a host snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read host snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write host snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse host snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_version() -> String {
    "1".to_string()
}
fn default_page_size() -> u64 {
    4096
}
fn default_status() -> u32 {
    SRUN
}

/// Root of a simulated host description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub shared_segment: SharedSegment,
    /// Refuse the host handle, as an unprivileged caller would see it.
    #[serde(default)]
    pub host_denied: bool,
    /// Pid whose task plays the role of the caller's own task.
    #[serde(default)]
    pub self_pid: Option<Pid>,
    #[serde(default)]
    pub processor_sets: Vec<SimProcessorSet>,
    #[serde(default)]
    pub processes: Vec<SimProcess>,
}

impl Default for HostSnapshot {
    fn default() -> Self {
        Self {
            version: default_version(),
            generated_at: None,
            page_size: default_page_size(),
            shared_segment: SharedSegment::default(),
            host_denied: false,
            self_pid: None,
            processor_sets: Vec::new(),
            processes: Vec::new(),
        }
    }
}

impl HostSnapshot {
    /// Builds a host with a single processor set holding every given process.
    pub fn with_processes(processes: Vec<SimProcess>) -> Self {
        let pids = processes.iter().map(|p| p.pid).collect();
        Self {
            processor_sets: vec![SimProcessorSet { pids }],
            processes,
            ..Self::default()
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// One processor set and the pids of the tasks assigned to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimProcessorSet {
    pub pids: Vec<Pid>,
}

/// A simulated process, its task and failure switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimProcess {
    pub pid: Pid,
    #[serde(default)]
    pub ppid: Pid,
    #[serde(default)]
    pub pgid: Pid,
    #[serde(default)]
    pub uid: u32,
    #[serde(default = "default_status")]
    pub status: u32,
    #[serde(default)]
    pub flags: u32,
    pub comm: String,

    /// `pid_for_task` fails (the task died between listing and lookup).
    #[serde(default)]
    pub pid_lookup_fails: bool,
    /// The BSD process record cannot be read.
    #[serde(default)]
    pub info_fails: bool,
    /// `task_for_pid` is refused.
    #[serde(default)]
    pub task_denied: bool,
    #[serde(default)]
    pub task_info_fails: bool,

    #[serde(default)]
    pub virtual_size: u64,
    #[serde(default)]
    pub resident_size: u64,
    #[serde(default)]
    pub user_time: TimeValue,
    #[serde(default)]
    pub system_time: TimeValue,

    #[serde(default)]
    pub regions: Vec<SimRegion>,
    /// `None` makes `task_threads` fail.
    #[serde(default)]
    pub threads: Option<Vec<SimThread>>,
    /// `None` makes port counting fail.
    #[serde(default)]
    pub ports: Option<u32>,
    /// Raw argument area as a byte array; `None` makes the fetch fail.
    #[serde(default)]
    pub arguments: Option<Vec<u8>>,
    #[serde(default)]
    pub argument_layout: ArgumentLayout,
}

impl SimProcess {
    pub fn new(pid: Pid, comm: &str) -> Self {
        Self {
            pid,
            ppid: 1,
            pgid: pid,
            uid: 0,
            status: SRUN,
            flags: 0,
            comm: comm.to_string(),
            pid_lookup_fails: false,
            info_fails: false,
            task_denied: false,
            task_info_fails: false,
            virtual_size: 0,
            resident_size: 0,
            user_time: TimeValue::default(),
            system_time: TimeValue::default(),
            regions: Vec::new(),
            threads: Some(Vec::new()),
            ports: Some(0),
            arguments: None,
            argument_layout: ArgumentLayout::WithArgc,
        }
    }

    pub fn with_region(mut self, region: SimRegion) -> Self {
        self.regions.push(region);
        self
    }

    pub fn with_thread(mut self, thread: SimThread) -> Self {
        self.threads.get_or_insert_with(Vec::new).push(thread);
        self
    }

    /// Argument area as `KERN_PROCARGS2` returns it.
    pub fn with_command_line(mut self, exec_path: &str, argv: &[&str]) -> Self {
        self.arguments = Some(procargs2(exec_path, argv));
        self.argument_layout = ArgumentLayout::WithArgc;
        self
    }

    /// Raw argument area without the argc header.
    pub fn with_bare_arguments(mut self, arguments: &[u8]) -> Self {
        self.arguments = Some(arguments.to_vec());
        self.argument_layout = ArgumentLayout::Bare;
        self
    }

    pub fn with_sizes(mut self, virtual_size: u64, resident_size: u64) -> Self {
        self.virtual_size = virtual_size;
        self.resident_size = resident_size;
        self
    }
}

/// Builds a `KERN_PROCARGS2` area: native-endian argc, the exec path padded
/// with NULs to the next 8-byte boundary, then each argument NUL-terminated.
pub fn procargs2(exec_path: &str, argv: &[&str]) -> Vec<u8> {
    let argc = i32::try_from(argv.len()).unwrap_or(i32::MAX);
    let mut area = argc.to_ne_bytes().to_vec();
    area.extend_from_slice(exec_path.as_bytes());
    let padded = (area.len() / 8 + 1) * 8;
    area.resize(padded, 0);
    for arg in argv {
        area.extend_from_slice(arg.as_bytes());
        area.push(0);
    }
    area
}

/// A simulated memory region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRegion {
    pub address: u64,
    pub size: u64,
    pub share_mode: ShareMode,
    #[serde(default)]
    pub object_id: u32,
    #[serde(default)]
    pub ref_count: u32,
    #[serde(default)]
    pub private_pages_resident: u32,
    #[serde(default)]
    pub shared_pages_resident: u32,
    #[serde(default)]
    pub reserved: bool,
    /// Makes the 64-bit basic info lookup for this region fail.
    #[serde(default)]
    pub basic_info_fails: bool,
}

impl SimRegion {
    pub fn new(address: u64, size: u64, share_mode: ShareMode) -> Self {
        Self {
            address,
            size,
            share_mode,
            object_id: 0,
            ref_count: 1,
            private_pages_resident: 0,
            shared_pages_resident: 0,
            reserved: false,
            basic_info_fails: false,
        }
    }

    pub fn object(mut self, object_id: u32, ref_count: u32) -> Self {
        self.object_id = object_id;
        self.ref_count = ref_count;
        self
    }

    pub fn resident(mut self, private_pages: u32, shared_pages: u32) -> Self {
        self.private_pages_resident = private_pages;
        self.shared_pages_resident = shared_pages;
        self
    }
}

/// A simulated thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimThread {
    pub run_state: ThreadRunState,
    #[serde(default)]
    pub sleep_time: u32,
    #[serde(default)]
    pub user_time: TimeValue,
    #[serde(default)]
    pub system_time: TimeValue,
    #[serde(default)]
    pub idle: bool,
    #[serde(default)]
    pub swapped: bool,
    #[serde(default)]
    pub info_fails: bool,
}

impl SimThread {
    pub fn new(run_state: ThreadRunState, sleep_time: u32) -> Self {
        Self {
            run_state,
            sleep_time,
            user_time: TimeValue::default(),
            system_time: TimeValue::default(),
            idle: false,
            swapped: false,
            info_fails: false,
        }
    }

    pub fn cpu(mut self, user: TimeValue, system: TimeValue) -> Self {
        self.user_time = user;
        self.system_time = system;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
    ProcessorSet(usize),
    Task(Pid),
    Thread(Pid, usize),
}

#[derive(Default)]
struct HandleTable {
    next: u32,
    live: HashMap<u32, HandleKind>,
}

impl HandleTable {
    fn allocate(&mut self, kind: HandleKind) -> u32 {
        // Handle numbers start above the reserved self task.
        self.next = self.next.max(SELF_TASK) + 1;
        self.live.insert(self.next, kind);
        self.next
    }
}

/// [`HostKernel`] backed by a [`HostSnapshot`].
pub struct SimulatedKernel {
    snapshot: HostSnapshot,
    index: HashMap<Pid, usize>,
    handles: Mutex<HandleTable>,
    self_releases: AtomicU64,
}

impl SimulatedKernel {
    pub fn new(snapshot: HostSnapshot) -> Self {
        let index = snapshot
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.pid, i))
            .collect();
        Self {
            snapshot,
            index,
            handles: Mutex::new(HandleTable::default()),
            self_releases: AtomicU64::new(0),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, SnapshotError> {
        Ok(Self::new(HostSnapshot::load(path)?))
    }

    pub fn snapshot(&self) -> &HostSnapshot {
        &self.snapshot
    }

    /// Number of handles handed out and not yet released.
    pub fn outstanding_handles(&self) -> usize {
        self.table().live.len()
    }

    /// Number of attempts to release the caller's own task.
    pub fn self_task_releases(&self) -> u64 {
        self.self_releases.load(Ordering::Relaxed)
    }

    fn table(&self) -> MutexGuard<'_, HandleTable> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn process(&self, pid: Pid) -> Option<&SimProcess> {
        self.index.get(&pid).map(|&i| &self.snapshot.processes[i])
    }

    fn resolve_task(&self, task: TaskHandle) -> Result<&SimProcess, KernelError> {
        let pid = if task.0 == SELF_TASK {
            self.snapshot
                .self_pid
                .ok_or(KernelError::UnknownHandle(task.0))?
        } else {
            match self.table().live.get(&task.0) {
                Some(HandleKind::Task(pid)) => *pid,
                _ => return Err(KernelError::UnknownHandle(task.0)),
            }
        };
        self.process(pid).ok_or(KernelError::NoSuchProcess(pid))
    }

    fn release(&self, handle: u32) {
        if handle == SELF_TASK {
            self.self_releases.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.table().live.remove(&handle).is_none() {
            debug!("Release of unknown simulated handle {}", handle);
        }
    }

    fn task_handle_for(&self, pid: Pid) -> TaskHandle {
        if self.snapshot.self_pid == Some(pid) {
            TaskHandle(SELF_TASK)
        } else {
            TaskHandle(self.table().allocate(HandleKind::Task(pid)))
        }
    }
}

impl HostKernel for SimulatedKernel {
    fn self_task(&self) -> TaskHandle {
        TaskHandle(SELF_TASK)
    }

    fn page_size(&self) -> u64 {
        self.snapshot.page_size
    }

    fn shared_segment(&self) -> SharedSegment {
        self.snapshot.shared_segment
    }

    fn processor_sets(&self) -> Result<Vec<ProcessorSetHandle>, KernelError> {
        if self.snapshot.host_denied {
            return Err(KernelError::InsufficientPrivileges);
        }
        let mut table = self.table();
        Ok((0..self.snapshot.processor_sets.len())
            .map(|i| ProcessorSetHandle(table.allocate(HandleKind::ProcessorSet(i))))
            .collect())
    }

    fn processor_set_tasks(&self, pset: ProcessorSetHandle) -> Result<Vec<TaskHandle>, KernelError> {
        let index = match self.table().live.get(&pset.0) {
            Some(HandleKind::ProcessorSet(i)) => *i,
            _ => return Err(KernelError::UnknownHandle(pset.0)),
        };
        Ok(self.snapshot.processor_sets[index]
            .pids
            .iter()
            .map(|&pid| self.task_handle_for(pid))
            .collect())
    }

    fn release_processor_set(&self, pset: ProcessorSetHandle) {
        self.release(pset.0);
    }

    fn pid_for_task(&self, task: TaskHandle) -> Result<Pid, KernelError> {
        let process = self.resolve_task(task)?;
        if process.pid_lookup_fails {
            return Err(KernelError::call("pid_for_task", KERN_FAILURE));
        }
        Ok(process.pid)
    }

    fn process_info(&self, pid: Pid) -> Result<BsdProcInfo, KernelError> {
        let p = self.process(pid).ok_or(KernelError::NoSuchProcess(pid))?;
        if p.info_fails {
            return Err(KernelError::NoSuchProcess(pid));
        }
        Ok(BsdProcInfo {
            pid: p.pid,
            ppid: p.ppid,
            pgid: p.pgid,
            uid: p.uid,
            status: p.status,
            flags: p.flags,
            comm: p.comm.clone(),
        })
    }

    fn task_for_pid(&self, pid: Pid) -> Result<TaskHandle, KernelError> {
        let p = self.process(pid).ok_or(KernelError::NoSuchProcess(pid))?;
        if p.task_denied {
            return Err(KernelError::call("task_for_pid", KERN_FAILURE));
        }
        Ok(self.task_handle_for(pid))
    }

    fn release_task(&self, task: TaskHandle) {
        self.release(task.0);
    }

    fn task_basic_info(&self, task: TaskHandle) -> Result<TaskBasicInfo, KernelError> {
        let p = self.resolve_task(task)?;
        if p.task_info_fails {
            return Err(KernelError::call("task_info", KERN_FAILURE));
        }
        Ok(TaskBasicInfo {
            virtual_size: p.virtual_size,
            resident_size: p.resident_size,
            user_time: p.user_time,
            system_time: p.system_time,
            suspend_count: 0,
        })
    }

    fn region_top_info(&self, task: TaskHandle, address: u64) -> Result<RegionTop, KernelError> {
        let p = self.resolve_task(task)?;
        p.regions
            .iter()
            .filter(|r| r.address.saturating_add(r.size) > address)
            .min_by_key(|r| r.address)
            .map(|r| RegionTop {
                address: r.address,
                size: r.size,
                info: RegionTopInfo {
                    object_id: r.object_id,
                    ref_count: r.ref_count,
                    private_pages_resident: r.private_pages_resident,
                    shared_pages_resident: r.shared_pages_resident,
                    share_mode: r.share_mode,
                },
            })
            .ok_or(KernelError::NoMoreRegions(address))
    }

    fn region_basic_info(
        &self,
        task: TaskHandle,
        address: u64,
    ) -> Result<RegionBasic, KernelError> {
        let p = self.resolve_task(task)?;
        let region = p
            .regions
            .iter()
            .find(|r| r.address <= address && address < r.address.saturating_add(r.size))
            .ok_or(KernelError::NoMoreRegions(address))?;
        if region.basic_info_fails {
            return Err(KernelError::call("mach_vm_region", KERN_FAILURE));
        }
        Ok(RegionBasic {
            address: region.address,
            size: region.size,
            shared: region.share_mode != ShareMode::Private,
            reserved: region.reserved,
        })
    }

    fn task_threads(&self, task: TaskHandle) -> Result<Vec<ThreadHandle>, KernelError> {
        let p = self.resolve_task(task)?;
        let threads = p
            .threads
            .as_ref()
            .ok_or(KernelError::call("task_threads", KERN_FAILURE))?;
        if task.0 == SELF_TASK {
            return Ok((0..threads.len())
                .map(|i| ThreadHandle(SELF_THREAD_BASE.saturating_add(i as u32)))
                .collect());
        }
        let mut table = self.table();
        Ok((0..threads.len())
            .map(|i| ThreadHandle(table.allocate(HandleKind::Thread(p.pid, i))))
            .collect())
    }

    fn thread_basic_info(&self, thread: ThreadHandle) -> Result<ThreadBasicInfo, KernelError> {
        let (pid, index) = if thread.0 >= SELF_THREAD_BASE {
            let pid = self
                .snapshot
                .self_pid
                .ok_or(KernelError::UnknownHandle(thread.0))?;
            (pid, (thread.0 - SELF_THREAD_BASE) as usize)
        } else {
            match self.table().live.get(&thread.0) {
                Some(HandleKind::Thread(pid, index)) => (*pid, *index),
                _ => return Err(KernelError::UnknownHandle(thread.0)),
            }
        };
        let t = self
            .process(pid)
            .and_then(|p| p.threads.as_ref())
            .and_then(|threads| threads.get(index))
            .ok_or(KernelError::UnknownHandle(thread.0))?;
        if t.info_fails {
            return Err(KernelError::call("thread_info", KERN_FAILURE));
        }
        Ok(ThreadBasicInfo {
            user_time: t.user_time,
            system_time: t.system_time,
            run_state: t.run_state,
            sleep_time: t.sleep_time,
            swapped: t.swapped,
            idle: t.idle,
        })
    }

    fn release_thread(&self, thread: ThreadHandle) {
        self.release(thread.0);
    }

    fn port_count(&self, task: TaskHandle) -> Result<u32, KernelError> {
        self.resolve_task(task)?
            .ports
            .ok_or(KernelError::call("mach_port_names", KERN_FAILURE))
    }

    fn process_arguments(&self, pid: Pid) -> Result<ArgumentArea, KernelError> {
        self.process(pid)
            .and_then(|p| {
                p.arguments.as_ref().map(|bytes| ArgumentArea {
                    layout: p.argument_layout,
                    bytes: bytes.clone(),
                })
            })
            .ok_or(KernelError::call("sysctl(KERN_PROCARGS2)", libc::EINVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SimulatedKernel {
        let p = SimProcess::new(42, "worker")
            .with_region(SimRegion::new(0x1000, 0x2000, ShareMode::Private).resident(2, 0))
            .with_region(SimRegion::new(0x8000, 0x1000, ShareMode::Shared).object(7, 2))
            .with_thread(SimThread::new(ThreadRunState::Running, 0));
        SimulatedKernel::new(HostSnapshot::with_processes(vec![p]))
    }

    #[test]
    fn test_region_walk_returns_next_region_above_address() {
        let k = host();
        let task = k.task_for_pid(42).expect("task");

        let first = k.region_top_info(task, 0).expect("first region");
        assert_eq!(first.address, 0x1000);

        let second = k.region_top_info(task, 0x3000).expect("second region");
        assert_eq!(second.address, 0x8000);
        assert_eq!(second.info.object_id, 7);

        assert!(k.region_top_info(task, 0x9000).is_err());
        k.release_task(task);
    }

    #[test]
    fn test_handles_are_tracked_until_released() {
        let k = host();
        let sets = k.processor_sets().expect("sets");
        let tasks = k.processor_set_tasks(sets[0]).expect("tasks");
        let threads = k.task_threads(tasks[0]).expect("threads");
        assert_eq!(k.outstanding_handles(), 3);

        for t in threads {
            k.release_thread(t);
        }
        k.release_task(tasks[0]);
        k.release_processor_set(sets[0]);
        assert_eq!(k.outstanding_handles(), 0);
    }

    #[test]
    fn test_host_denied_refuses_processor_sets() {
        let snapshot = HostSnapshot {
            host_denied: true,
            ..HostSnapshot::default()
        };
        let k = SimulatedKernel::new(snapshot);
        assert_eq!(
            k.processor_sets().unwrap_err(),
            KernelError::InsufficientPrivileges
        );
    }

    #[test]
    fn test_snapshot_json_defaults() {
        let json = r#"{
            "processor_sets": [ { "pids": [7] } ],
            "processes": [ { "pid": 7, "comm": "launchd", "arguments": [120, 0], "argument_layout": "bare" } ]
        }"#;
        let snapshot = HostSnapshot::from_json_str(json).expect("parse");
        assert_eq!(snapshot.page_size, 4096);
        assert_eq!(snapshot.processes[0].status, SRUN);
        assert!(snapshot.processes[0].threads.is_none());

        let k = SimulatedKernel::new(snapshot);
        let area = k.process_arguments(7).expect("args");
        assert_eq!(area.bytes, b"x\0");
        assert_eq!(area.layout, ArgumentLayout::Bare);
    }

    #[test]
    fn test_procargs2_layout() {
        let area = procargs2("/bin/sh", &["sh", "-c"]);
        assert_eq!(&area[0..4], &2i32.to_ne_bytes());
        assert_eq!(&area[4..11], b"/bin/sh");
        assert_eq!(area.len() % 8, 6);
        assert!(area[11..16].iter().all(|&b| b == 0));
        assert_eq!(&area[16..], b"sh\0-c\0");
    }

    #[test]
    fn test_argument_bytes_survive_json() {
        // argc 200 puts a byte above 0x7f into the header.
        let snapshot = HostSnapshot::with_processes(vec![
            SimProcess::new(3, "many").with_command_line("/bin/many", &["many"; 200]),
        ]);
        let json = serde_json::to_string(&snapshot).expect("json");
        let loaded = HostSnapshot::from_json_str(&json).expect("parse");
        assert_eq!(loaded.processes[0].arguments, snapshot.processes[0].arguments);
        assert_eq!(loaded.processes[0].argument_layout, ArgumentLayout::WithArgc);
    }

    #[test]
    fn test_self_thread_handles_are_not_tracked() {
        let mut snapshot = HostSnapshot::with_processes(vec![SimProcess::new(9, "self")
            .with_thread(SimThread::new(ThreadRunState::Running, 0))
            .with_thread(SimThread::new(ThreadRunState::Waiting, 3))]);
        snapshot.self_pid = Some(9);
        let k = SimulatedKernel::new(snapshot);

        for _ in 0..3 {
            let threads = k.task_threads(k.self_task()).expect("threads");
            assert_eq!(threads.len(), 2);
            let info = k.thread_basic_info(threads[1]).expect("info");
            assert_eq!(info.run_state, ThreadRunState::Waiting);
        }
        assert_eq!(k.outstanding_handles(), 0);
    }
}
