//! Live Mach/BSD backend.
//!
//! Raw FFI through `libc` plus hand-declared Mach entry points. Out-of-line
//! arrays the kernel hands back are copied into `Vec`s and deallocated from
//! our address space before returning.

use libc::{c_int, c_void, size_t};
use once_cell::sync::Lazy;
use std::mem;
use std::ptr;
use tracing::debug;

use super::types::{
    ArgumentArea, ArgumentLayout, BsdProcInfo, Pid, ProcessorSetHandle, RegionBasic, RegionTop,
    RegionTopInfo, ShareMode, SharedSegment, TaskBasicInfo, TaskHandle, ThreadBasicInfo,
    ThreadHandle, ThreadRunState, TimeValue,
};
use super::{HostKernel, KernelError};

type MachPort = u32;
type KernReturn = c_int;

const KERN_SUCCESS: KernReturn = 0;

const CTL_KERN: c_int = 1;
const KERN_ARGMAX: c_int = 8;
const KERN_PROCARGS2: c_int = 49;

const PROC_PIDTBSDINFO: c_int = 3;

const MACH_TASK_BASIC_INFO: c_int = 20;
const THREAD_BASIC_INFO: c_int = 3;
const VM_REGION_BASIC_INFO_64: c_int = 9;
const VM_REGION_TOP_INFO: c_int = 12;

const TH_FLAGS_SWAPPED: i32 = 0x1;
const TH_FLAGS_IDLE: i32 = 0x2;

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
});

#[repr(C)]
#[derive(Default)]
struct ProcBsdInfo {
    pbi_flags: u32,
    pbi_status: u32,
    pbi_xstatus: u32,
    pbi_pid: u32,
    pbi_ppid: u32,
    pbi_uid: u32,
    pbi_gid: u32,
    pbi_ruid: u32,
    pbi_rgid: u32,
    pbi_svuid: u32,
    pbi_svgid: u32,
    _reserved: u32,
    pbi_comm: [u8; 16],
    pbi_name: [u8; 32],
    pbi_nfiles: u32,
    pbi_pgid: u32,
    pbi_pjobc: u32,
    e_tdev: u32,
    e_tpgid: u32,
    pbi_nice: i32,
    pbi_start_tvsec: u64,
    pbi_start_tvusec: u64,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct RawTimeValue {
    seconds: i32,
    microseconds: i32,
}

impl From<RawTimeValue> for TimeValue {
    fn from(raw: RawTimeValue) -> Self {
        TimeValue::new(raw.seconds.max(0) as u32, raw.microseconds.max(0) as u32)
    }
}

#[repr(C, packed(4))]
#[derive(Default, Clone, Copy)]
struct MachTaskBasicInfo {
    virtual_size: u64,
    resident_size: u64,
    resident_size_max: u64,
    user_time: RawTimeValue,
    system_time: RawTimeValue,
    policy: i32,
    suspend_count: i32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct RawThreadBasicInfo {
    user_time: RawTimeValue,
    system_time: RawTimeValue,
    cpu_usage: i32,
    policy: i32,
    run_state: i32,
    flags: i32,
    suspend_count: i32,
    sleep_time: i32,
}

#[repr(C, packed(4))]
#[derive(Default, Clone, Copy)]
struct VmRegionTopInfo {
    obj_id: u32,
    ref_count: u32,
    private_pages_resident: u32,
    shared_pages_resident: u32,
    share_mode: u8,
}

#[repr(C, packed(4))]
#[derive(Default, Clone, Copy)]
struct VmRegionBasicInfo64 {
    protection: i32,
    max_protection: i32,
    inheritance: u32,
    shared: u32,
    reserved: u32,
    offset: u64,
    behavior: i32,
    user_wired_count: u16,
}

/// Count argument for `*_info` calls, in 32-bit words.
fn info_count<T>() -> u32 {
    (mem::size_of::<T>() / mem::size_of::<c_int>()) as u32
}

extern "C" {
    fn mach_host_self() -> MachPort;
    fn mach_task_self() -> MachPort;
    fn host_processor_sets(
        host: MachPort,
        psets: *mut *mut MachPort,
        count: *mut u32,
    ) -> KernReturn;
    fn host_processor_set_priv(
        host_priv: MachPort,
        set_name: MachPort,
        set: *mut MachPort,
    ) -> KernReturn;
    fn processor_set_tasks(
        pset: MachPort,
        tasks: *mut *mut MachPort,
        count: *mut u32,
    ) -> KernReturn;
    fn pid_for_task(task: MachPort, pid: *mut c_int) -> KernReturn;
    fn task_for_pid(target: MachPort, pid: c_int, task: *mut MachPort) -> KernReturn;
    fn task_info(task: MachPort, flavor: c_int, info: *mut c_int, count: *mut u32) -> KernReturn;
    fn task_threads(task: MachPort, threads: *mut *mut MachPort, count: *mut u32) -> KernReturn;
    fn thread_info(
        thread: MachPort,
        flavor: c_int,
        info: *mut c_int,
        count: *mut u32,
    ) -> KernReturn;
    fn mach_vm_region(
        task: MachPort,
        address: *mut u64,
        size: *mut u64,
        flavor: c_int,
        info: *mut c_int,
        count: *mut u32,
        object_name: *mut MachPort,
    ) -> KernReturn;
    fn mach_port_names(
        task: MachPort,
        names: *mut *mut MachPort,
        names_count: *mut u32,
        types: *mut *mut u32,
        types_count: *mut u32,
    ) -> KernReturn;
    fn mach_port_deallocate(task: MachPort, name: MachPort) -> KernReturn;
    fn vm_deallocate(target_task: MachPort, address: usize, size: usize) -> KernReturn;
}

extern "C" {
    fn proc_pidinfo(
        pid: c_int,
        flavor: c_int,
        arg: u64,
        buffer: *mut c_void,
        buffersize: c_int,
    ) -> c_int;
}

/// Copies an out-of-line port array and returns its memory to the kernel.
///
/// # Safety
/// `array` must point to `count` ports allocated by the kernel in our task.
unsafe fn take_port_array(array: *mut MachPort, count: u32) -> Vec<MachPort> {
    if array.is_null() {
        return Vec::new();
    }
    let ports = std::slice::from_raw_parts(array, count as usize).to_vec();
    vm_deallocate(
        mach_task_self(),
        array as usize,
        count as usize * mem::size_of::<MachPort>(),
    );
    ports
}

fn check(call: &'static str, kr: KernReturn) -> Result<(), KernelError> {
    if kr == KERN_SUCCESS {
        Ok(())
    } else {
        Err(KernelError::call(call, kr))
    }
}

/// [`HostKernel`] backed by the running Mach kernel.
pub struct MachKernel {
    host: MachPort,
    segment: SharedSegment,
}

impl MachKernel {
    pub fn new() -> Self {
        Self::with_shared_segment(SharedSegment::LEGACY)
    }

    pub fn with_shared_segment(segment: SharedSegment) -> Self {
        Self {
            host: unsafe { mach_host_self() },
            segment,
        }
    }

    fn deallocate_port(&self, port: MachPort) {
        let kr = unsafe { mach_port_deallocate(mach_task_self(), port) };
        if kr != KERN_SUCCESS {
            debug!("mach_port_deallocate({}) returned {}", port, kr);
        }
    }

    fn region<T: Default>(
        &self,
        task: TaskHandle,
        address: u64,
        flavor: c_int,
    ) -> Result<(u64, u64, T), KernelError> {
        let mut addr = address;
        let mut size: u64 = 0;
        let mut info = T::default();
        let mut count = info_count::<T>();
        let mut object_name: MachPort = 0;
        let kr = unsafe {
            mach_vm_region(
                task.0,
                &mut addr,
                &mut size,
                flavor,
                &mut info as *mut T as *mut c_int,
                &mut count,
                &mut object_name,
            )
        };
        if object_name != 0 {
            self.deallocate_port(object_name);
        }
        if kr != KERN_SUCCESS {
            return Err(KernelError::NoMoreRegions(address));
        }
        Ok((addr, size, info))
    }
}

impl Default for MachKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKernel for MachKernel {
    fn self_task(&self) -> TaskHandle {
        TaskHandle(unsafe { mach_task_self() })
    }

    fn page_size(&self) -> u64 {
        *PAGE_SIZE
    }

    fn shared_segment(&self) -> SharedSegment {
        self.segment
    }

    fn processor_sets(&self) -> Result<Vec<ProcessorSetHandle>, KernelError> {
        let mut array: *mut MachPort = ptr::null_mut();
        let mut count: u32 = 0;
        let kr = unsafe { host_processor_sets(self.host, &mut array, &mut count) };
        if kr != KERN_SUCCESS {
            return Err(KernelError::InsufficientPrivileges);
        }
        let names = unsafe { take_port_array(array, count) };

        let mut sets = Vec::with_capacity(names.len());
        let mut failure = None;
        for name in names {
            let mut pset: MachPort = 0;
            let kr = unsafe { host_processor_set_priv(self.host, name, &mut pset) };
            self.deallocate_port(name);
            if kr == KERN_SUCCESS {
                sets.push(ProcessorSetHandle(pset));
            } else if failure.is_none() {
                failure = Some(kr);
            }
        }
        if let Some(kr) = failure {
            for set in sets {
                self.release_processor_set(set);
            }
            debug!("host_processor_set_priv returned {}", kr);
            return Err(KernelError::InsufficientPrivileges);
        }
        Ok(sets)
    }

    fn processor_set_tasks(&self, pset: ProcessorSetHandle) -> Result<Vec<TaskHandle>, KernelError> {
        let mut array: *mut MachPort = ptr::null_mut();
        let mut count: u32 = 0;
        check("processor_set_tasks", unsafe {
            processor_set_tasks(pset.0, &mut array, &mut count)
        })?;
        let tasks = unsafe { take_port_array(array, count) };
        Ok(tasks.into_iter().map(TaskHandle).collect())
    }

    fn release_processor_set(&self, pset: ProcessorSetHandle) {
        self.deallocate_port(pset.0);
    }

    fn pid_for_task(&self, task: TaskHandle) -> Result<Pid, KernelError> {
        let mut pid: c_int = 0;
        check("pid_for_task", unsafe { pid_for_task(task.0, &mut pid) })?;
        Ok(pid)
    }

    fn process_info(&self, pid: Pid) -> Result<BsdProcInfo, KernelError> {
        let mut info = ProcBsdInfo::default();
        let size = mem::size_of::<ProcBsdInfo>() as c_int;
        let ret = unsafe {
            proc_pidinfo(
                pid,
                PROC_PIDTBSDINFO,
                0,
                &mut info as *mut ProcBsdInfo as *mut c_void,
                size,
            )
        };
        if ret != size {
            return Err(KernelError::NoSuchProcess(pid));
        }
        let len = info.pbi_comm.iter().position(|&b| b == 0).unwrap_or(16);
        Ok(BsdProcInfo {
            pid: info.pbi_pid as Pid,
            ppid: info.pbi_ppid as Pid,
            pgid: info.pbi_pgid as Pid,
            uid: info.pbi_uid,
            status: info.pbi_status,
            flags: info.pbi_flags,
            comm: String::from_utf8_lossy(&info.pbi_comm[..len]).into_owned(),
        })
    }

    fn task_for_pid(&self, pid: Pid) -> Result<TaskHandle, KernelError> {
        let mut task: MachPort = 0;
        check("task_for_pid", unsafe {
            task_for_pid(mach_task_self(), pid, &mut task)
        })?;
        Ok(TaskHandle(task))
    }

    fn release_task(&self, task: TaskHandle) {
        if task == self.self_task() {
            return;
        }
        self.deallocate_port(task.0);
    }

    fn task_basic_info(&self, task: TaskHandle) -> Result<TaskBasicInfo, KernelError> {
        let mut info = MachTaskBasicInfo::default();
        let mut count = info_count::<MachTaskBasicInfo>();
        check("task_info", unsafe {
            task_info(
                task.0,
                MACH_TASK_BASIC_INFO,
                &mut info as *mut MachTaskBasicInfo as *mut c_int,
                &mut count,
            )
        })?;
        let MachTaskBasicInfo {
            virtual_size,
            resident_size,
            user_time,
            system_time,
            suspend_count,
            ..
        } = info;
        Ok(TaskBasicInfo {
            virtual_size,
            resident_size,
            user_time: user_time.into(),
            system_time: system_time.into(),
            suspend_count,
        })
    }

    fn region_top_info(&self, task: TaskHandle, address: u64) -> Result<RegionTop, KernelError> {
        let (address, size, info) =
            self.region::<VmRegionTopInfo>(task, address, VM_REGION_TOP_INFO)?;
        let VmRegionTopInfo {
            obj_id,
            ref_count,
            private_pages_resident,
            shared_pages_resident,
            share_mode,
        } = info;
        Ok(RegionTop {
            address,
            size,
            info: RegionTopInfo {
                object_id: obj_id,
                ref_count,
                private_pages_resident,
                shared_pages_resident,
                share_mode: ShareMode::from_raw(share_mode),
            },
        })
    }

    fn region_basic_info(
        &self,
        task: TaskHandle,
        address: u64,
    ) -> Result<RegionBasic, KernelError> {
        let (address, size, info) =
            self.region::<VmRegionBasicInfo64>(task, address, VM_REGION_BASIC_INFO_64)?;
        let VmRegionBasicInfo64 {
            shared, reserved, ..
        } = info;
        Ok(RegionBasic {
            address,
            size,
            shared: shared != 0,
            reserved: reserved != 0,
        })
    }

    fn task_threads(&self, task: TaskHandle) -> Result<Vec<ThreadHandle>, KernelError> {
        let mut array: *mut MachPort = ptr::null_mut();
        let mut count: u32 = 0;
        check("task_threads", unsafe {
            task_threads(task.0, &mut array, &mut count)
        })?;
        let threads = unsafe { take_port_array(array, count) };
        Ok(threads.into_iter().map(ThreadHandle).collect())
    }

    fn thread_basic_info(&self, thread: ThreadHandle) -> Result<ThreadBasicInfo, KernelError> {
        let mut info = RawThreadBasicInfo::default();
        let mut count = info_count::<RawThreadBasicInfo>();
        check("thread_info", unsafe {
            thread_info(
                thread.0,
                THREAD_BASIC_INFO,
                &mut info as *mut RawThreadBasicInfo as *mut c_int,
                &mut count,
            )
        })?;
        Ok(ThreadBasicInfo {
            user_time: info.user_time.into(),
            system_time: info.system_time.into(),
            run_state: ThreadRunState::from_raw(info.run_state),
            sleep_time: info.sleep_time.max(0) as u32,
            swapped: info.flags & TH_FLAGS_SWAPPED != 0,
            idle: info.flags & TH_FLAGS_IDLE != 0,
        })
    }

    fn release_thread(&self, thread: ThreadHandle) {
        self.deallocate_port(thread.0);
    }

    fn port_count(&self, task: TaskHandle) -> Result<u32, KernelError> {
        let mut names: *mut MachPort = ptr::null_mut();
        let mut names_count: u32 = 0;
        let mut types: *mut u32 = ptr::null_mut();
        let mut types_count: u32 = 0;
        check("mach_port_names", unsafe {
            mach_port_names(
                task.0,
                &mut names,
                &mut names_count,
                &mut types,
                &mut types_count,
            )
        })?;
        unsafe {
            take_port_array(names, names_count);
            take_port_array(types, types_count);
        }
        Ok(names_count)
    }

    fn process_arguments(&self, pid: Pid) -> Result<ArgumentArea, KernelError> {
        let mut argmax: c_int = 0;
        let mut size = mem::size_of::<c_int>() as size_t;
        let mut mib: [c_int; 2] = [CTL_KERN, KERN_ARGMAX];
        let ret = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                2,
                &mut argmax as *mut c_int as *mut c_void,
                &mut size,
                ptr::null_mut(),
                0,
            )
        };
        if ret != 0 || argmax <= 0 {
            return Err(KernelError::call("sysctl(KERN_ARGMAX)", ret));
        }

        let mut buffer = vec![0u8; argmax as usize];
        let mut size = argmax as size_t;
        let mut mib: [c_int; 3] = [CTL_KERN, KERN_PROCARGS2, pid];
        let ret = unsafe {
            libc::sysctl(
                mib.as_mut_ptr(),
                3,
                buffer.as_mut_ptr() as *mut c_void,
                &mut size,
                ptr::null_mut(),
                0,
            )
        };
        if ret != 0 {
            return Err(KernelError::call("sysctl(KERN_PROCARGS2)", ret));
        }
        buffer.truncate(size);
        Ok(ArgumentArea {
            layout: ArgumentLayout::WithArgc,
            bytes: buffer,
        })
    }
}
