//! Sample history for tracking host-wide process accounting over time.
//!
//! A fixed-capacity circular buffer of plain `Copy` samples with predictable
//! memory usage, plus the per-refresh [`HostSample`] it is used with.

use serde::{Serialize, Serializer};

use crate::engine::Snapshot;
use crate::process::{ProcessRecord, ProcessState};

/// Size of a single host sample in bytes.
pub const SAMPLE_SIZE_BYTES: usize = 208;

/// Top process information stored in a sample (24 bytes per entry).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopProcessInfo {
    pub pid: u32,
    /// KB for memory rankings, centiseconds for CPU rankings.
    pub value: u32,
    #[serde(serialize_with = "serialize_name")]
    pub name: [u8; 16],
}

fn serialize_name<S: Serializer>(name: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&name_from_bytes(name))
}

fn name_from_bytes(name: &[u8; 16]) -> String {
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    String::from_utf8_lossy(&name[..len]).into_owned()
}

impl TopProcessInfo {
    pub fn new(pid: u32, value: u32, name: &str) -> Self {
        let mut name_bytes = [0u8; 16];
        let bytes = name.as_bytes();
        // The last byte always stays 0 and a character is never split.
        let mut len = bytes.len().min(15);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        name_bytes[..len].copy_from_slice(&bytes[..len]);
        Self {
            pid,
            value,
            name: name_bytes,
        }
    }

    pub fn name_str(&self) -> String {
        name_from_bytes(&self.name)
    }
}

/// Fixed-size summary of one refresh pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HostSample {
    pub timestamp: i64,
    pub processes: u32,
    pub threads: u32,
    pub running: u32,
    pub zombies: u32,
    pub virtual_kb: u64,
    pub private_kb: u64,
    pub shared_kb: u64,
    pub aliased_kb: u64,
    pub framework_private_kb: u64,
    pub top_private: [TopProcessInfo; 3],
    pub top_cpu: [TopProcessInfo; 3],
}

fn top_3<F, V>(records: &[ProcessRecord], key_fn: F, value_fn: V) -> [TopProcessInfo; 3]
where
    F: Fn(&ProcessRecord) -> u128,
    V: Fn(&ProcessRecord) -> u32,
{
    let mut sorted: Vec<&ProcessRecord> = records.iter().collect();
    sorted.sort_by(|a, b| key_fn(b).cmp(&key_fn(a)).then(a.pid.cmp(&b.pid)));

    let mut top = [TopProcessInfo::default(); 3];
    for (slot, record) in top.iter_mut().zip(sorted) {
        *slot = TopProcessInfo::new(record.pid.max(0) as u32, value_fn(record), &record.command);
    }
    top
}

fn saturating_u32(value: u128) -> u32 {
    value.min(u32::MAX as u128) as u32
}

impl HostSample {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let totals = &snapshot.totals;
        let records = &snapshot.records;
        Self {
            timestamp: snapshot.taken_at.timestamp(),
            processes: saturating_u32(totals.processes as u128),
            threads: saturating_u32(totals.threads as u128),
            running: saturating_u32(snapshot.running() as u128),
            zombies: saturating_u32(snapshot.count(ProcessState::Zombie) as u128),
            virtual_kb: totals.virtual_bytes / 1024,
            private_kb: totals.private_bytes / 1024,
            shared_kb: totals.shared_bytes / 1024,
            aliased_kb: totals.aliased_bytes / 1024,
            framework_private_kb: totals.framework_private_bytes / 1024,
            top_private: top_3(
                records,
                |r| r.private_bytes as u128,
                |r| saturating_u32((r.private_bytes / 1024) as u128),
            ),
            top_cpu: top_3(
                records,
                |r| r.total_time.as_micros(),
                |r| saturating_u32(r.total_time.as_millis() / 10),
            ),
        }
    }
}

/// A circular buffer with fixed capacity and a read cursor.
///
/// Pushing onto a full buffer overwrites the oldest sample.
#[derive(Debug, Clone)]
pub struct SampleHistory<T: Copy + Default> {
    entries: Vec<T>,
    capacity: usize,
    write_index: usize,
    count: usize,
    cursor: usize,
}

impl<T: Copy + Default> SampleHistory<T> {
    /// Creates a history holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: vec![T::default(); capacity],
            capacity,
            write_index: 0,
            count: 0,
            cursor: 0,
        }
    }

    pub fn push(&mut self, sample: T) {
        self.entries[self.write_index] = sample;
        self.write_index = (self.write_index + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    /// Slot of the `n`-th oldest sample.
    fn slot(&self, n: usize) -> usize {
        (self.write_index + self.capacity - self.count + n) % self.capacity
    }

    /// Rewinds the read cursor to the oldest sample.
    pub fn start_iterate(&mut self) {
        self.cursor = 0;
    }

    /// Next sample from the cursor, oldest first.
    pub fn get_next(&mut self) -> Option<T> {
        if self.cursor >= self.count {
            return None;
        }
        let sample = self.entries[self.slot(self.cursor)];
        self.cursor += 1;
        Some(sample)
    }

    /// Newest sample.
    pub fn get_current(&self) -> Option<T> {
        self.count
            .checked_sub(1)
            .map(|n| self.entries[self.slot(n)])
    }

    /// Sample before the newest one.
    pub fn get_last(&self) -> Option<T> {
        self.count
            .checked_sub(2)
            .map(|n| self.entries[self.slot(n)])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// All samples in chronological order (oldest to newest).
    pub fn to_vec(&self) -> Vec<T> {
        (0..self.count).map(|n| self.entries[self.slot(n)]).collect()
    }
}

/// History of host samples, appended once per refresh.
#[derive(Debug, Clone)]
pub struct HostHistory {
    samples: SampleHistory<HostSample>,
}

impl HostHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: SampleHistory::new(capacity),
        }
    }

    pub fn refresh(&mut self, snapshot: &Snapshot) {
        self.samples.push(HostSample::from_snapshot(snapshot));
    }

    pub fn samples(&self) -> &SampleHistory<HostSample> {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut SampleHistory<HostSample> {
        &mut self.samples
    }

    /// Estimated memory held by the buffer.
    pub fn estimated_bytes(&self) -> usize {
        self.samples.capacity() * SAMPLE_SIZE_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_size() {
        assert_eq!(std::mem::size_of::<HostSample>(), SAMPLE_SIZE_BYTES);
        assert_eq!(std::mem::size_of::<TopProcessInfo>(), 24);
    }

    #[test]
    fn test_top_process_name_is_nul_terminated() {
        let info = TopProcessInfo::new(1, 2, "com.apple.WebKit.WebContent");
        assert_eq!(info.name[15], 0);
        assert_eq!(info.name_str(), "com.apple.WebKi");
    }

    #[test]
    fn test_top_process_name_keeps_whole_characters() {
        let info = TopProcessInfo::new(1, 2, &"\u{3b1}".repeat(9));
        assert_eq!(info.name_str(), "\u{3b1}".repeat(7));
        assert!(!info.name_str().contains('\u{fffd}'));

        let info = TopProcessInfo::new(1, 2, "Activity Moni\u{2713}r");
        assert_eq!(info.name_str(), "Activity Moni");
    }

    #[test]
    fn test_current_and_last() {
        let mut history: SampleHistory<u32> = SampleHistory::new(3);
        assert_eq!(history.get_current(), None);
        history.push(1);
        assert_eq!(history.get_current(), Some(1));
        assert_eq!(history.get_last(), None);
        history.push(2);
        history.push(3);
        history.push(4);
        assert_eq!(history.get_current(), Some(4));
        assert_eq!(history.get_last(), Some(3));
    }

    #[test]
    fn test_iteration_after_wraparound() {
        let mut history: SampleHistory<u32> = SampleHistory::new(3);
        for i in 0..5 {
            history.push(i);
        }
        history.start_iterate();
        let mut seen = Vec::new();
        while let Some(v) = history.get_next() {
            seen.push(v);
        }
        assert_eq!(seen, vec![2, 3, 4]);
        assert_eq!(history.to_vec(), vec![2, 3, 4]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let history: SampleHistory<u32> = SampleHistory::new(0);
        assert_eq!(history.capacity(), 1);
        assert!(history.is_empty());
    }
}
