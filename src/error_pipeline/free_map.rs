//! Spare free-map: tracks unallocated sector ranges in the spare data
//! region so [`super::RemapCreationJob`] can allocate a destination range
//! for a new remap (spec.md §4.5 step 1, "allocate a spare sector range
//! from the free-map (first-fit is acceptable)").
//!
//! spec.md leaves the free-map's representation unspecified; we model it
//! as an ordered run-length list of free ranges, grounded on the teacher's
//! `rebuild::rebuild_map::RebuildMap` (`io-engine/src/rebuild/rebuild_map.rs`),
//! which tracks rebuild state as ranges over a device rather than a
//! per-sector bitmap. Ours tracks *free* ranges instead of *dirty* ones,
//! and supports allocation (remove a sub-range) and release (coalesce a
//! range back in) instead of a single "mark clean" operation.

use std::sync::Mutex;

use snafu::Snafu;

use crate::core::{Sector, SectorRange};

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum FreeMapError {
    #[snafu(display("spare device has no remaining capacity for {requested} sectors"))]
    SpareFull { requested: u32 },
    #[snafu(display(
        "spare range [{start}, len {length}) is not available to allocate (outside the data region or already allocated)"
    ))]
    NotFree { start: Sector, length: u32 },
}

struct Inner {
    /// Sorted, non-adjacent, non-overlapping free ranges.
    free: Vec<SectorRange>,
}

/// Mutex-guarded free-range list (spec.md §5: "Spare free-map: one
/// mutator at a time; mutex; brief critical sections").
pub struct SpareFreeMap {
    inner: Mutex<Inner>,
}

impl SpareFreeMap {
    /// Creates a free-map covering `[region_start, region_end)` as a
    /// single free run.
    pub fn new(region_start: Sector, region_end: Sector) -> Self {
        let length = (region_end - region_start) as u32;
        SpareFreeMap {
            inner: Mutex::new(Inner {
                free: vec![SectorRange::new(region_start, length)],
            }),
        }
    }

    /// Total sectors still free.
    pub fn remaining(&self) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .free
            .iter()
            .map(|r| r.length as u64)
            .sum()
    }

    /// Allocates the first free range able to satisfy `length` sectors,
    /// splitting it if it is larger than needed (first-fit, spec.md §4.5
    /// step 1).
    pub fn allocate(&self, length: u32) -> Result<Sector, FreeMapError> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner
            .free
            .iter()
            .position(|r| r.length >= length)
            .ok_or(FreeMapError::SpareFull { requested: length })?;

        let run = inner.free[pos];
        let allocated_start = run.start;
        if run.length == length {
            inner.free.remove(pos);
        } else {
            inner.free[pos] = SectorRange::new(run.start + length as Sector, run.length - length);
        }
        Ok(allocated_start)
    }

    /// Removes a specific range from the free-map, e.g. to reclaim the
    /// ranges backing entries loaded from metadata at construction
    /// (spec.md §4.6 step 3: entries loaded from metadata are live from
    /// the moment the index is populated) or to reserve a caller-chosen
    /// range for a message-driven `add_remap` (spec.md §4.6 "Runtime
    /// messages"), so a later error-pipeline allocation can never hand out
    /// an overlapping range (spec.md §3/P2). Fails if `[start, start +
    /// length)` is not fully covered by a single free run, i.e. it is
    /// outside the data region or already allocated.
    pub fn allocate_exact(&self, start: Sector, length: u32) -> Result<(), FreeMapError> {
        let mut inner = self.inner.lock().unwrap();
        let target = SectorRange::new(start, length);
        let pos = inner
            .free
            .iter()
            .position(|r| r.start <= target.start && target.end() <= r.end())
            .ok_or(FreeMapError::NotFree { start, length })?;

        let run = inner.free[pos];
        inner.free.remove(pos);
        if run.start < target.start {
            inner.free.push(SectorRange::new(run.start, (target.start - run.start) as u32));
        }
        if target.end() < run.end() {
            inner.free.push(SectorRange::new(
                target.end(),
                (run.end() - target.end()) as u32,
            ));
        }
        inner.free.sort_by_key(|r| r.start);
        Ok(())
    }

    /// Releases a previously allocated range back into the free-map,
    /// coalescing it with an adjacent free run where possible.
    pub fn release(&self, start: Sector, length: u32) {
        let mut inner = self.inner.lock().unwrap();
        let released = SectorRange::new(start, length);
        inner.free.push(released);
        inner.free.sort_by_key(|r| r.start);

        let mut merged: Vec<SectorRange> = Vec::with_capacity(inner.free.len());
        for range in inner.free.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == range.start => {
                    *last = SectorRange::new(last.start, last.length + range.length);
                }
                _ => merged.push(range),
            }
        }
        inner.free = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_round_trips() {
        let map = SpareFreeMap::new(100, 200);
        assert_eq!(map.remaining(), 100);
        let start = map.allocate(10).unwrap();
        assert_eq!(start, 100);
        assert_eq!(map.remaining(), 90);
        map.release(start, 10);
        assert_eq!(map.remaining(), 100);
    }

    #[test]
    fn allocate_fails_when_full() {
        let map = SpareFreeMap::new(0, 10);
        map.allocate(10).unwrap();
        let err = map.allocate(1).unwrap_err();
        assert_eq!(err, FreeMapError::SpareFull { requested: 1 });
    }

    #[test]
    fn allocate_exact_reserves_a_specific_range() {
        let map = SpareFreeMap::new(0, 100);
        map.allocate_exact(10, 5).unwrap();
        assert_eq!(map.remaining(), 95);
        // The same range can't be reserved twice.
        assert_eq!(
            map.allocate_exact(10, 5).unwrap_err(),
            FreeMapError::NotFree { start: 10, length: 5 }
        );
    }

    #[test]
    fn allocate_exact_rejects_range_outside_the_region() {
        let map = SpareFreeMap::new(100, 200);
        let err = map.allocate_exact(0, 10).unwrap_err();
        assert_eq!(err, FreeMapError::NotFree { start: 0, length: 10 });
    }

    #[test]
    fn allocate_splits_larger_run() {
        let map = SpareFreeMap::new(0, 100);
        let a = map.allocate(10).unwrap();
        let b = map.allocate(10).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 10);
        assert_eq!(map.remaining(), 80);
    }
}
