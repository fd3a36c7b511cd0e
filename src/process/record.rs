//! Per-process records and filtering.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::time::Duration;

use super::state::{BsdStatus, ProcessState};
use crate::kernel::{BsdProcInfo, Pid};

/// Everything one pass learned about a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub ppid: Pid,
    pub pgrp: Pid,
    pub uid: u32,
    pub status: BsdStatus,
    pub flags: u32,
    pub state: ProcessState,

    /// Virtual size after the shared segment correction.
    pub virtual_size: u64,
    pub resident_size: u64,
    /// Private resident bytes, aliased memory included.
    pub private_bytes: u64,
    pub shared_bytes: u64,
    pub aliased_bytes: u64,
    pub virtual_private_bytes: u64,
    pub memory_objects: u64,

    pub total_time: Duration,
    pub idle_time: Duration,

    pub threads: usize,
    pub all_swapped: bool,
    pub has_idle_thread: bool,

    /// `None` when the IPC space could not be read.
    pub ports: Option<u32>,
    pub command: String,
    /// Short name kept by the BSD layer.
    pub accounting_name: String,
}

impl ProcessRecord {
    /// A record carrying only BSD identity, as left behind by a process
    /// that could not be inspected.
    pub fn from_bsd(info: &BsdProcInfo) -> Self {
        Self {
            pid: info.pid,
            ppid: info.ppid,
            pgrp: info.pgid,
            uid: info.uid,
            status: BsdStatus::from_raw(info.status),
            flags: info.flags,
            state: ProcessState::Unknown,
            virtual_size: 0,
            resident_size: 0,
            private_bytes: 0,
            shared_bytes: 0,
            aliased_bytes: 0,
            virtual_private_bytes: 0,
            memory_objects: 0,
            total_time: Duration::ZERO,
            idle_time: Duration::ZERO,
            threads: 0,
            all_swapped: false,
            has_idle_thread: false,
            ports: None,
            command: info.comm.clone(),
            accounting_name: info.comm.clone(),
        }
    }

    /// Marks the process as gone mid-inspection.
    pub fn mark_zombie(&mut self) {
        self.status = BsdStatus::Zombie;
        self.state = ProcessState::Zombie;
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }
}

/// Ordering for record listings; all but `Pid` sort largest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Private,
    Shared,
    Aliased,
    Cpu,
    Pid,
}

impl SortKey {
    pub fn sort(self, records: &mut [&ProcessRecord]) {
        match self {
            SortKey::Private => records.sort_by_key(|r| (Reverse(r.private_bytes), r.pid)),
            SortKey::Shared => records.sort_by_key(|r| (Reverse(r.shared_bytes), r.pid)),
            SortKey::Aliased => records.sort_by_key(|r| (Reverse(r.aliased_bytes), r.pid)),
            SortKey::Cpu => records.sort_by_key(|r| (Reverse(r.total_time), r.pid)),
            SortKey::Pid => records.sort_by_key(|r| r.pid),
        }
    }
}

/// Include/exclude filter on the display command.
///
/// Exclusions win over inclusions; an empty include list admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ProcessFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn matches(&self, record: &ProcessRecord) -> bool {
        self.admits(&record.command)
    }

    /// Name-level check.
    pub fn admits(&self, name: &str) -> bool {
        if self.exclude.iter().any(|s| name.contains(s.as_str())) {
            return false;
        }
        if !self.include.is_empty() {
            return self.include.iter().any(|s| name.contains(s.as_str()));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Tests for ProcessFilter
    // -------------------------------------------------------------------------

    #[test]
    fn test_filter_no_rules_admits_all() {
        let filter = ProcessFilter::default();
        assert!(filter.admits("launchd"));
        assert!(filter.admits("WindowServer"));
    }

    #[test]
    fn test_filter_exclude() {
        let filter = ProcessFilter::new(vec![], vec!["mds".to_string()]);
        assert!(!filter.admits("mds_stores"));
        assert!(filter.admits("launchd"));
    }

    #[test]
    fn test_filter_include() {
        let filter = ProcessFilter::new(vec!["Safari".to_string()], vec![]);
        assert!(filter.admits("Safari"));
        assert!(filter.admits("SafariBookmarksSyncAgent"));
        assert!(!filter.admits("Finder"));
    }

    #[test]
    fn test_filter_exclude_takes_priority() {
        let filter = ProcessFilter::new(vec!["Web".to_string()], vec!["Helper".to_string()]);
        assert!(!filter.admits("WebHelper"));
        assert!(filter.admits("WebContent"));
    }

    #[test]
    fn test_sort_by_private_then_pid() {
        let mut records: Vec<ProcessRecord> = (1..=3)
            .map(|pid| {
                let info = BsdProcInfo {
                    pid,
                    ppid: 1,
                    pgid: pid,
                    uid: 0,
                    status: 2,
                    flags: 0,
                    comm: format!("p{}", pid),
                };
                ProcessRecord::from_bsd(&info)
            })
            .collect();
        records[0].private_bytes = 10;
        records[2].private_bytes = 10;
        records[1].private_bytes = 50;

        let mut refs: Vec<&ProcessRecord> = records.iter().collect();
        SortKey::Private.sort(&mut refs);
        let pids: Vec<_> = refs.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![2, 1, 3]);

        SortKey::Pid.sort(&mut refs);
        assert_eq!(refs[0].pid, 1);
    }

    #[test]
    fn test_zombie_marking() {
        let info = BsdProcInfo {
            pid: 5,
            ppid: 1,
            pgid: 5,
            uid: 501,
            status: 2,
            flags: 0,
            comm: "gone".to_string(),
        };
        let mut record = ProcessRecord::from_bsd(&info);
        assert_eq!(record.status, BsdStatus::Runnable);
        record.mark_zombie();
        assert!(record.is_zombie());
        assert_eq!(record.status, BsdStatus::Zombie);
    }
}
