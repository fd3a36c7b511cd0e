//! Plain data returned by kernel calls.
//!
//! These mirror the Mach/BSD structures the engine consumes, reduced to the
//! fields that accounting actually reads. Backends translate their native
//! layouts into these types so the engine never touches raw kernel memory.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process identifier as reported by the BSD layer.
pub type Pid = i32;

/// Opaque processor-set handle (a Mach port name on live hosts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorSetHandle(pub u32);

/// Opaque task handle (a Mach task port name on live hosts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u32);

/// Opaque thread handle (a Mach thread port name on live hosts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub u32);

/// Kernel classification of how a memory region is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
    CopyOnWrite,
    Private,
    Empty,
    Shared,
    TrueShared,
    PrivateAliased,
    SharedAliased,
    LargePage,
    Unknown,
}

impl ShareMode {
    /// Maps the raw `SM_*` constant from `vm_region.h`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => ShareMode::CopyOnWrite,
            2 => ShareMode::Private,
            3 => ShareMode::Empty,
            4 => ShareMode::Shared,
            5 => ShareMode::TrueShared,
            6 => ShareMode::PrivateAliased,
            7 => ShareMode::SharedAliased,
            8 => ShareMode::LargePage,
            _ => ShareMode::Unknown,
        }
    }
}

/// Top-level region information (`VM_REGION_TOP_INFO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTopInfo {
    pub object_id: u32,
    pub ref_count: u32,
    pub private_pages_resident: u32,
    pub shared_pages_resident: u32,
    pub share_mode: ShareMode,
}

/// A region found by the top-info walk, starting at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTop {
    pub address: u64,
    pub size: u64,
    pub info: RegionTopInfo,
}

/// Subset of `VM_REGION_BASIC_INFO_64` used for split detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBasic {
    pub address: u64,
    pub size: u64,
    pub shared: bool,
    pub reserved: bool,
}

/// The system-wide shared text/data segment mapped into every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedSegment {
    pub text_base: u64,
    pub text_size: u64,
    pub data_base: u64,
    pub data_size: u64,
}

impl SharedSegment {
    /// The classic 32-bit layout: 256 MiB of text at 0x9000_0000 followed by
    /// 256 MiB of data at 0xA000_0000.
    pub const LEGACY: SharedSegment = SharedSegment {
        text_base: 0x9000_0000,
        text_size: 0x1000_0000,
        data_base: 0xA000_0000,
        data_size: 0x1000_0000,
    };

    /// True when `address` lies anywhere in the text or data half.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.text_base && address < self.data_base.saturating_add(self.data_size)
    }

    /// Size subtracted from a task's virtual size once a private split is seen.
    pub fn reserved_size(&self) -> u64 {
        self.text_size.saturating_add(self.data_size)
    }
}

impl Default for SharedSegment {
    fn default() -> Self {
        SharedSegment::LEGACY
    }
}

/// Seconds + microseconds pair as the kernel reports CPU time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub seconds: u32,
    pub microseconds: u32,
}

impl TimeValue {
    pub fn new(seconds: u32, microseconds: u32) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds as u64) + Duration::from_micros(self.microseconds as u64)
    }
}

/// Task-wide counters (`MACH_TASK_BASIC_INFO`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskBasicInfo {
    pub virtual_size: u64,
    pub resident_size: u64,
    /// CPU time of threads that already terminated.
    pub user_time: TimeValue,
    pub system_time: TimeValue,
    pub suspend_count: i32,
}

/// Raw Mach thread run state (`TH_STATE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRunState {
    Running,
    Stopped,
    Waiting,
    Uninterruptible,
    Halted,
    Unknown,
}

impl ThreadRunState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ThreadRunState::Running,
            2 => ThreadRunState::Stopped,
            3 => ThreadRunState::Waiting,
            4 => ThreadRunState::Uninterruptible,
            5 => ThreadRunState::Halted,
            _ => ThreadRunState::Unknown,
        }
    }
}

/// Per-thread counters (`THREAD_BASIC_INFO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBasicInfo {
    pub user_time: TimeValue,
    pub system_time: TimeValue,
    pub run_state: ThreadRunState,
    /// Seconds the thread has been sleeping.
    pub sleep_time: u32,
    pub swapped: bool,
    pub idle: bool,
}

/// BSD-level identity of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsdProcInfo {
    pub pid: Pid,
    pub ppid: Pid,
    pub pgid: Pid,
    pub uid: u32,
    /// Raw `p_stat` value; zero means the slot is already gone.
    pub status: u32,
    pub flags: u32,
    /// Kernel accounting name, at most `MAXCOMLEN` bytes.
    pub comm: String,
}

/// How a raw argument area is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentLayout {
    /// `KERN_PROCARGS2`: native-endian argc word, exec path, NUL padding,
    /// then the NUL-terminated arguments.
    #[default]
    WithArgc,
    /// The NUL-terminated arguments only.
    Bare,
}

/// Argument area of one process as fetched from the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentArea {
    pub layout: ArgumentLayout,
    pub bytes: Vec<u8>,
}
