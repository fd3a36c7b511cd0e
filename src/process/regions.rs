//! Memory region classification.
//!
//! Walks one task's address space from address 0 upward, one region at a
//! time, and splits its resident memory into private and shared figures.
//! Shared and multiply-referenced copy-on-write objects are registered in the
//! [`AliasTable`]; once the walk ends the table decides which of them are
//! really only mapped by this task.

use serde::Serialize;
use tracing::debug;

use crate::alias_table::{AliasTable, ObjectShare};
use crate::kernel::{HostKernel, KernelError, Pid, RegionTop, ShareMode, SharedSegment, TaskHandle};

/// Result of classifying one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionSummary {
    pub shared_bytes: u64,
    /// Private resident bytes, excluding aliased memory.
    pub private_bytes: u64,
    pub aliased_bytes: u64,
    pub virtual_private_bytes: u64,
    /// Regions that went through classification.
    pub region_count: u64,
    /// Private resident bytes inside the system shared segment.
    pub framework_private_bytes: u64,
    /// The task's shared segment was split from the system-wide one.
    pub split_detected: bool,
    /// A secondary region lookup failed and the walk stopped there.
    pub stopped_early: bool,
}

impl RegionSummary {
    /// Applies the shared segment correction to a task's virtual size.
    pub fn corrected_virtual_size(&self, virtual_size: u64, segment: &SharedSegment) -> u64 {
        if self.split_detected {
            virtual_size.saturating_sub(segment.reserved_size())
        } else {
            virtual_size
        }
    }
}

/// Walks and classifies every region of `task`.
///
/// Objects are only registered for `pid != 0`. The end of the address space
/// is reported by the kernel as an error and ends the walk normally.
pub fn classify_regions(
    kernel: &dyn HostKernel,
    task: TaskHandle,
    pid: Pid,
    table: &mut AliasTable,
    page_size: u64,
    segment: &SharedSegment,
) -> RegionSummary {
    let mut summary = RegionSummary::default();
    let mut address: u64 = 0;

    loop {
        let region = match kernel.region_top_info(task, address) {
            Ok(region) => region,
            Err(KernelError::NoMoreRegions(_)) => break,
            Err(e) => {
                debug!("Region walk of pid {} ended at {:#x}: {}", pid, address, e);
                break;
            }
        };
        let next = match region.address.checked_add(region.size) {
            Some(next) if region.size > 0 => next,
            _ => break,
        };
        address = next;

        let info = &region.info;
        if segment.contains(region.address) {
            summary.framework_private_bytes += info.private_pages_resident as u64 * page_size;

            if !summary.split_detected && info.share_mode == ShareMode::Empty {
                match kernel.region_basic_info(task, region.address) {
                    Ok(basic) => summary.split_detected = basic.reserved,
                    Err(e) => {
                        debug!(
                            "Basic region info for pid {} at {:#x} failed: {}",
                            pid, region.address, e
                        );
                        summary.stopped_early = true;
                        break;
                    }
                }
            }
            if info.share_mode != ShareMode::Private {
                continue;
            }
        }

        summary.region_count += 1;
        classify_region(&region, pid, table, page_size, &mut summary);
    }

    let reconciled = table.reconcile_pass(pid, page_size);
    summary.shared_bytes += reconciled.shared_bytes;
    summary.aliased_bytes += reconciled.aliased_bytes;
    summary.virtual_private_bytes += reconciled.virtual_private_bytes;
    summary
}

fn classify_region(
    region: &RegionTop,
    pid: Pid,
    table: &mut AliasTable,
    page_size: u64,
    summary: &mut RegionSummary,
) {
    let info = &region.info;
    let private_resident = info.private_pages_resident as u64 * page_size;
    let shared_resident = info.shared_pages_resident as u64 * page_size;

    match info.share_mode {
        ShareMode::Private => {
            summary.private_bytes += private_resident;
            summary.virtual_private_bytes += region.size;
        }
        ShareMode::CopyOnWrite if info.ref_count == 1 => {
            // Nobody else references the object.
            summary.private_bytes += shared_resident + private_resident;
            summary.virtual_private_bytes += region.size;
        }
        ShareMode::CopyOnWrite => {
            if pid != 0 {
                table.register(
                    info.object_id,
                    ObjectShare::CopyOnWrite,
                    info.shared_pages_resident,
                    info.ref_count,
                    region.size,
                    pid,
                );
            }
            summary.private_bytes += private_resident;
            summary.virtual_private_bytes += private_resident;
        }
        ShareMode::Shared => {
            if pid != 0 {
                table.register(
                    info.object_id,
                    ObjectShare::Shared,
                    info.shared_pages_resident,
                    info.ref_count,
                    region.size,
                    pid,
                );
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::simulated::{HostSnapshot, SimProcess, SimRegion, SimulatedKernel};

    const PAGE: u64 = 4096;

    fn classify(process: SimProcess) -> (RegionSummary, SimulatedKernel) {
        let pid = process.pid;
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![process]));
        let task = kernel.task_for_pid(pid).expect("task");
        let mut table = AliasTable::new();
        let summary = classify_regions(
            &kernel,
            task,
            pid,
            &mut table,
            PAGE,
            &SharedSegment::LEGACY,
        );
        kernel.release_task(task);
        (summary, kernel)
    }

    #[test]
    fn test_private_region_counts_resident_pages() {
        let p = SimProcess::new(10, "a")
            .with_region(SimRegion::new(0x1000, 4 * PAGE, ShareMode::Private).resident(3, 0));
        let (s, _) = classify(p);
        assert_eq!(s.private_bytes, 3 * PAGE);
        assert_eq!(s.virtual_private_bytes, 4 * PAGE);
        assert_eq!(s.region_count, 1);
    }

    #[test]
    fn test_single_reference_cow_is_private() {
        let p = SimProcess::new(10, "a").with_region(
            SimRegion::new(0x1000, 4 * PAGE, ShareMode::CopyOnWrite)
                .object(5, 1)
                .resident(1, 2),
        );
        let (s, _) = classify(p);
        assert_eq!(s.private_bytes, 3 * PAGE);
        assert_eq!(s.virtual_private_bytes, 4 * PAGE);
        assert_eq!(s.shared_bytes, 0);
    }

    #[test]
    fn test_multiply_referenced_cow_splits_private_and_shared() {
        let p = SimProcess::new(10, "a").with_region(
            SimRegion::new(0x1000, 4 * PAGE, ShareMode::CopyOnWrite)
                .object(5, 3)
                .resident(1, 2),
        );
        let (s, _) = classify(p);
        assert_eq!(s.private_bytes, PAGE);
        assert_eq!(s.virtual_private_bytes, PAGE);
        assert_eq!(s.shared_bytes, 2 * PAGE);
    }

    #[test]
    fn test_shared_object_mapped_twice_by_one_task_is_aliased() {
        let p = SimProcess::new(10, "a")
            .with_region(
                SimRegion::new(0x1000, 2 * PAGE, ShareMode::Shared)
                    .object(77, 2)
                    .resident(0, 2),
            )
            .with_region(
                SimRegion::new(0x10000, 2 * PAGE, ShareMode::Shared)
                    .object(77, 2)
                    .resident(0, 2),
            );
        let (s, _) = classify(p);
        assert_eq!(s.aliased_bytes, 2 * PAGE);
        assert_eq!(s.shared_bytes, 0);
        assert_eq!(s.virtual_private_bytes, 4 * PAGE);
    }

    #[test]
    fn test_shared_segment_regions_are_skipped_unless_private() {
        let seg = SharedSegment::LEGACY;
        let p = SimProcess::new(10, "a")
            .with_region(
                SimRegion::new(seg.text_base, PAGE, ShareMode::Shared)
                    .object(1, 9)
                    .resident(2, 5),
            )
            .with_region(SimRegion::new(seg.data_base, PAGE, ShareMode::Private).resident(1, 0));
        let (s, _) = classify(p);
        assert_eq!(s.region_count, 1);
        assert_eq!(s.framework_private_bytes, 3 * PAGE);
        assert_eq!(s.shared_bytes, 0);
        assert_eq!(s.private_bytes, PAGE);
    }

    #[test]
    fn test_reserved_empty_region_marks_split() {
        let seg = SharedSegment::LEGACY;
        let mut empty = SimRegion::new(seg.text_base, PAGE, ShareMode::Empty);
        empty.reserved = true;
        let p = SimProcess::new(10, "a").with_region(empty);
        let (s, _) = classify(p);
        assert!(s.split_detected);
        assert_eq!(
            s.corrected_virtual_size(seg.reserved_size() + 100, &seg),
            100
        );
        assert_eq!(s.corrected_virtual_size(10, &seg), 0);
    }

    #[test]
    fn test_failed_basic_info_stops_walk() {
        let seg = SharedSegment::LEGACY;
        let mut empty = SimRegion::new(seg.text_base, PAGE, ShareMode::Empty);
        empty.basic_info_fails = true;
        let p = SimProcess::new(10, "a")
            .with_region(SimRegion::new(0x1000, PAGE, ShareMode::Private).resident(1, 0))
            .with_region(empty)
            .with_region(SimRegion::new(0xC000_0000, PAGE, ShareMode::Private).resident(1, 0));
        let (s, _) = classify(p);
        assert!(s.stopped_early);
        assert_eq!(s.private_bytes, PAGE);
        assert_eq!(s.region_count, 1);
    }

    #[test]
    fn test_kernel_task_never_registers_objects() {
        let p = SimProcess::new(0, "kernel_task").with_region(
            SimRegion::new(0x1000, PAGE, ShareMode::Shared)
                .object(3, 1)
                .resident(0, 1),
        );
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![p]));
        let task = kernel.task_for_pid(0).expect("task");
        let mut table = AliasTable::new();
        let s = classify_regions(&kernel, task, 0, &mut table, PAGE, &SharedSegment::LEGACY);
        kernel.release_task(task);
        assert!(table.is_empty());
        assert_eq!(s.region_count, 1);
        assert_eq!(s.aliased_bytes, 0);
    }

    #[test]
    fn test_reclassifying_is_idempotent() {
        let p = SimProcess::new(10, "a")
            .with_region(SimRegion::new(0x1000, PAGE, ShareMode::Private).resident(1, 0))
            .with_region(
                SimRegion::new(0x4000, PAGE, ShareMode::Shared)
                    .object(8, 4)
                    .resident(0, 1),
            );
        let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![p]));
        let task = kernel.task_for_pid(10).expect("task");
        let mut table = AliasTable::new();
        let seg = SharedSegment::LEGACY;
        let first = classify_regions(&kernel, task, 10, &mut table, PAGE, &seg);
        table.reset();
        let second = classify_regions(&kernel, task, 10, &mut table, PAGE, &seg);
        kernel.release_task(task);
        assert_eq!(first, second);
    }
}
