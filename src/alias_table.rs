//! Shared-object alias table.
//!
//! Every memory object seen during one pass is recorded here, keyed by its
//! kernel object id. After a task's regions are walked, `reconcile_pass`
//! decides for each of that task's objects whether the sharing is real or
//! whether every reference to the object came from the same task, in which
//! case the memory is "aliased" and counted as private.
//!
//! Storage is an index-based arena chained into a fixed number of buckets.
//! `reset` moves every entry to the free list so a pass starts with an empty
//! table without giving the memory back.

/// Number of hash buckets.
pub const BUCKETS: usize = 537;

fn bucket_of(object_id: u32) -> usize {
    ((object_id as usize) / BUCKETS) % BUCKETS
}

/// How an object is shared, as far as the table knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectShare {
    Private,
    CopyOnWrite,
    Shared,
    /// Shared on paper but every reference belongs to one task.
    AliasedPrivate,
}

/// One tracked memory object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub object_id: u32,
    pub share: ObjectShare,
    /// Resident pages of the object.
    pub resident_pages: u32,
    /// Total kernel references to the object.
    pub ref_count: u32,
    /// References seen from the task currently being walked.
    pub task_ref_count: u32,
    /// Accumulated mapped size in bytes.
    pub size: u64,
    /// Last task that registered the object.
    pub pid: i32,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: ObjectEntry,
    next: Option<usize>,
}

/// Byte totals produced by reconciling one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub shared_bytes: u64,
    pub aliased_bytes: u64,
    pub virtual_private_bytes: u64,
}

/// Chained hash table of memory objects with entry recycling.
#[derive(Debug, Clone)]
pub struct AliasTable {
    slots: Vec<Slot>,
    buckets: Vec<Option<usize>>,
    free: Option<usize>,
    live: usize,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AliasTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            buckets: vec![None; BUCKETS],
            free: None,
            live: 0,
        }
    }

    /// Records one mapping of `object_id`.
    ///
    /// A known object grows by `size`, gains one task reference and takes
    /// `pid` as its owner. A new object starts with one task reference.
    pub fn register(
        &mut self,
        object_id: u32,
        share: ObjectShare,
        resident_pages: u32,
        ref_count: u32,
        size: u64,
        pid: i32,
    ) {
        let bucket = bucket_of(object_id);

        let mut cursor = self.buckets[bucket];
        while let Some(index) = cursor {
            let slot = &mut self.slots[index];
            if slot.entry.object_id == object_id {
                slot.entry.size += size;
                slot.entry.task_ref_count += 1;
                slot.entry.pid = pid;
                return;
            }
            cursor = slot.next;
        }

        let entry = ObjectEntry {
            object_id,
            share,
            resident_pages,
            ref_count,
            task_ref_count: 1,
            size,
            pid,
        };
        let head = self.buckets[bucket];
        let index = match self.free {
            Some(index) => {
                self.free = self.slots[index].next;
                self.slots[index] = Slot { entry, next: head };
                index
            }
            None => {
                self.slots.push(Slot { entry, next: head });
                self.slots.len() - 1
            }
        };
        self.buckets[bucket] = Some(index);
        self.live += 1;
    }

    /// Closes the walk of task `pid`.
    ///
    /// Shared objects owned by `pid` whose every reference came from this
    /// task become aliased. Task reference counts are cleared on every entry
    /// afterwards, whichever task owns it.
    pub fn reconcile_pass(&mut self, pid: i32, page_size: u64) -> Reconciliation {
        let mut totals = Reconciliation::default();
        for bucket in 0..BUCKETS {
            let mut cursor = self.buckets[bucket];
            while let Some(index) = cursor {
                let entry = &mut self.slots[index].entry;
                if entry.pid == pid {
                    if entry.share == ObjectShare::Shared
                        && entry.ref_count == entry.task_ref_count
                    {
                        entry.share = ObjectShare::AliasedPrivate;
                        totals.aliased_bytes += entry.resident_pages as u64 * page_size;
                        totals.virtual_private_bytes += entry.size;
                    }
                    if entry.share != ObjectShare::AliasedPrivate {
                        totals.shared_bytes += entry.resident_pages as u64 * page_size;
                    }
                }
                entry.task_ref_count = 0;
                cursor = self.slots[index].next;
            }
        }
        totals
    }

    /// Returns every entry to the free list.
    pub fn reset(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let mut cursor = bucket.take();
            while let Some(index) = cursor {
                cursor = self.slots[index].next;
                self.slots[index].next = self.free;
                self.free = Some(index);
            }
        }
        self.live = 0;
    }

    pub fn get(&self, object_id: u32) -> Option<&ObjectEntry> {
        let mut cursor = self.buckets[bucket_of(object_id)];
        while let Some(index) = cursor {
            let slot = &self.slots[index];
            if slot.entry.object_id == object_id {
                return Some(&slot.entry);
            }
            cursor = slot.next;
        }
        None
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of recycled entries waiting for reuse.
    pub fn free_len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.free;
        while let Some(index) = cursor {
            count += 1;
            cursor = self.slots[index].next;
        }
        count
    }

    /// Iterates live entries in bucket order.
    pub fn entries(&self) -> impl Iterator<Item = &ObjectEntry> + '_ {
        self.buckets.iter().flat_map(move |head| {
            let mut cursor = *head;
            std::iter::from_fn(move || {
                let index = cursor?;
                cursor = self.slots[index].next;
                Some(&self.slots[index].entry)
            })
        })
    }
}
