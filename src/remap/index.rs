//! Component B: the remap index (spec.md §4.2).
//!
//! A power-of-two bucket array with separate chaining, resized by doubling
//! or halving in a background worker while `find` stays lock-free apart
//! from the brief exclusive window the resize itself needs. Grounded on
//! the teacher's read-mostly-table convention (`parking_lot::RwLock`
//! guarding a `Bdev` lookup table) generalized to our sector map.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::RwLock;
use snafu::Snafu;

use crate::{
    config::{LOAD_HIGH, LOAD_LOW, MIN_BUCKETS},
    core::Sector,
    remap::{entry::RemapEntry, hash::bucket_index},
};

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum IndexError {
    #[snafu(display("a remap for sector {sector} already exists"))]
    Duplicate { sector: Sector },
    #[snafu(display("out of memory growing the remap index"))]
    OutOfMemory,
}

/// Direction a resize should move the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDirection {
    Grow,
    Shrink,
}

struct Table {
    buckets: Vec<Vec<Arc<RemapEntry>>>,
}

impl Table {
    fn with_size(size: usize) -> Self {
        Table {
            buckets: (0..size).map(|_| Vec::new()).collect(),
        }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }
}

pub struct RemapIndex {
    table: RwLock<Table>,
    count: AtomicUsize,
    /// Set while a grow/shrink has been scheduled or is running, to
    /// suppress scheduling a second one (spec.md §4.2 resize step 1).
    resize_pending: AtomicBool,
}

impl Default for RemapIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RemapIndex {
    pub fn new() -> Self {
        RemapIndex {
            table: RwLock::new(Table::with_size(MIN_BUCKETS)),
            count: AtomicUsize::new(0),
            resize_pending: AtomicBool::new(false),
        }
    }

    /// Builds an index pre-sized to `next_power_of_two(1.3 * expected)`,
    /// used at construction when reloading a known number of entries
    /// (spec.md §4.6 step 4).
    pub fn with_expected_count(expected: usize) -> Self {
        let target = ((expected as f64) * 1.3).ceil() as usize;
        let size = target.max(MIN_BUCKETS).next_power_of_two();
        RemapIndex {
            table: RwLock::new(Table::with_size(size)),
            count: AtomicUsize::new(0),
            resize_pending: AtomicBool::new(false),
        }
    }

    /// Expected O(1): one read-lock acquisition, one bucket hash, one
    /// chain walk (chains are expected length <= 2 at steady-state load).
    ///
    /// `sector` is looked up by range containment, not just exact key
    /// match, so a request anywhere inside a multi-sector remap resolves
    /// to the entry that created it (spec.md §4.4: `spare_offset =
    /// entry.spare_sector + (request.sector - entry.main_sector)`). Every
    /// sector a range covers is indexed at insert time so this stays a
    /// single bucket lookup regardless of range length.
    pub fn find(&self, sector: Sector) -> Option<Arc<RemapEntry>> {
        let table = self.table.read();
        let idx = bucket_index(sector, table.size());
        table.buckets[idx]
            .iter()
            .find(|e| e.main_range().contains(sector))
            .cloned()
    }

    /// Inserts `entry`, indexing every sector in its main range. Rejects
    /// the insert (and touches nothing) if any covered sector already maps
    /// to something, preserving the disjoint-ranges invariant (spec.md
    /// §3 P2).
    pub fn insert(&self, entry: Arc<RemapEntry>) -> Result<(), IndexError> {
        let mut table = self.table.write();
        let size = table.size();
        let range = entry.main_range();
        for sector in range.iter() {
            let idx = bucket_index(sector, size);
            if table.buckets[idx]
                .iter()
                .any(|e| e.main_range().contains(sector))
            {
                return Err(IndexError::Duplicate {
                    sector: entry.main_sector,
                });
            }
        }
        for sector in range.iter() {
            let idx = bucket_index(sector, size);
            table.buckets[idx].push(entry.clone());
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Removes the entry covering `sector` (by its original `main_sector`,
    /// i.e. the range start) and unindexes every sector it covered.
    pub fn remove(&self, sector: Sector) -> Option<Arc<RemapEntry>> {
        let mut table = self.table.write();
        let size = table.size();
        let idx = bucket_index(sector, size);
        let entry = table.buckets[idx]
            .iter()
            .find(|e| e.main_range().contains(sector))
            .cloned()?;
        for s in entry.main_range().iter() {
            let i = bucket_index(s, size);
            if let Some(pos) = table.buckets[i].iter().position(|e| Arc::ptr_eq(e, &entry)) {
                table.buckets[i].remove(pos);
            }
        }
        self.count.fetch_sub(1, Ordering::AcqRel);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size(&self) -> usize {
        self.table.read().size()
    }

    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.size() as f64
    }

    /// Snapshot of every entry, for persistence (spec.md §4.2 `iter`).
    /// Takes the read lock only for the duration of the copy so a
    /// concurrent resize is not held off any longer than necessary. A
    /// range entry is indexed once per covered sector (see `insert`), so
    /// this dedups by pointer identity the same way `resize` does -
    /// otherwise a multi-sector remap would appear `length` times in the
    /// persisted body.
    pub fn snapshot(&self) -> Vec<Arc<RemapEntry>> {
        let table = self.table.read();
        let mut seen = std::collections::HashSet::new();
        table
            .buckets
            .iter()
            .flatten()
            .filter(|e| seen.insert(Arc::as_ptr(e)))
            .cloned()
            .collect()
    }

    /// Checks whether a resize should be scheduled, returning `None` if
    /// one is already pending/in-flight or the load is within bounds.
    pub fn check_resize_needed(&self) -> Option<ResizeDirection> {
        if self.resize_pending.swap(true, Ordering::AcqRel) {
            // already scheduled or running
            return None;
        }
        let direction = self.resize_direction();
        if direction.is_none() {
            self.resize_pending.store(false, Ordering::Release);
        }
        direction
    }

    fn resize_direction(&self) -> Option<ResizeDirection> {
        let load = self.load_factor();
        let size = self.size();
        if load > LOAD_HIGH {
            Some(ResizeDirection::Grow)
        } else if load < LOAD_LOW && size > MIN_BUCKETS {
            Some(ResizeDirection::Shrink)
        } else {
            None
        }
    }

    /// Performs the resize: allocate a new bucket array, rehash every
    /// entry into it, atomically swap it in. The whole operation runs
    /// under the write lock (spec.md §4.2 step 3: "`find` is serialized
    /// behind it"), which is acceptable because resizes are rare and
    /// expected to complete in tens of milliseconds for realistic entry
    /// counts (spec.md §4.2 rationale).
    pub fn resize(&self, direction: ResizeDirection) {
        let mut table = self.table.write();
        let old_size = table.size();
        let new_size = match direction {
            ResizeDirection::Grow => old_size * 2,
            ResizeDirection::Shrink => (old_size / 2).max(MIN_BUCKETS),
        };
        if new_size == old_size {
            self.resize_pending.store(false, Ordering::Release);
            return;
        }

        // A range entry is indexed once per covered sector, so dedup by
        // pointer identity before rehashing or it would be rehashed (and
        // overcounted) once per sector instead of once per entry.
        let mut seen = std::collections::HashSet::new();
        let mut new_table = Table::with_size(new_size);
        for entry in table.buckets.drain(..).flatten() {
            if !seen.insert(Arc::as_ptr(&entry)) {
                continue;
            }
            for sector in entry.main_range().iter() {
                let idx = bucket_index(sector, new_size);
                new_table.buckets[idx].push(entry.clone());
            }
        }
        *table = new_table;
        self.resize_pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sector: Sector) -> Arc<RemapEntry> {
        Arc::new(RemapEntry::new(sector, sector + 1_000_000, 1))
    }

    #[test]
    fn insert_find_remove() {
        let idx = RemapIndex::new();
        idx.insert(entry(42)).unwrap();
        assert!(idx.find(42).is_some());
        assert!(idx.find(43).is_none());
        let removed = idx.remove(42).unwrap();
        assert_eq!(removed.main_sector, 42);
        assert!(idx.find(42).is_none());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let idx = RemapIndex::new();
        idx.insert(entry(7)).unwrap();
        let err = idx.insert(entry(7)).unwrap_err();
        assert_eq!(err, IndexError::Duplicate { sector: 7 });
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn find_at_range_end_is_none() {
        let idx = RemapIndex::new();
        let e = Arc::new(RemapEntry::new(100, 5000, 4));
        idx.insert(e).unwrap();
        assert!(idx.find(103).is_some());
        assert!(idx.find(104).is_none());
    }

    #[test]
    fn resize_grows_and_preserves_entries() {
        let idx = RemapIndex::new();
        assert_eq!(idx.size(), MIN_BUCKETS);
        for sector in 0..97u64 {
            idx.insert(entry(sector)).unwrap();
            if let Some(direction) = idx.check_resize_needed() {
                idx.resize(direction);
            }
        }
        assert_eq!(idx.size(), 128);
        for sector in 0..97u64 {
            assert!(idx.find(sector).is_some(), "sector {sector} missing after resize");
        }
    }

    #[test]
    fn shrink_never_goes_below_min_buckets() {
        let idx = RemapIndex::new();
        if let Some(direction) = idx.check_resize_needed() {
            idx.resize(direction);
        }
        assert_eq!(idx.size(), MIN_BUCKETS);
    }
}
