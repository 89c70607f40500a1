//! `RemapEntry` and its state machine (spec.md §3, §4.5).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::{Sector, SectorRange};

/// Lifecycle state of a single remap.
///
/// ```text
///  (none) --insert--> PENDING --persist-ok--> ACTIVE --spare I/O error--> FAILED
///                         |
///                     persist-fail
///                         v
///                     (removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapState {
    /// Creation queued but not yet durably persisted. Not observable by
    /// the I/O path (spec.md §4.4 invariant).
    Pending,
    /// Persisted and live: reads/writes to `main_sector` redirect to
    /// `spare_sector`.
    Active,
    /// The spare copy itself is bad; the mapping is poison and must never
    /// be redirected to again, but is kept around so the I/O path can
    /// propagate a clear error instead of silently passing through.
    Failed,
}

/// A single main-sector-range -> spare-sector-range mapping.
///
/// `error_count` and `access_time` are maintenance metadata mutated from
/// many call sites without a lock (spec.md §5 table): they are relaxed
/// atomics, not plain fields, so `find` (a shared reference) can still
/// bump `access_time` on every hit.
#[derive(Debug)]
pub struct RemapEntry {
    pub main_sector: Sector,
    pub spare_sector: Sector,
    pub length: u32,
    state: std::sync::atomic::AtomicU8,
    error_count: AtomicU32,
    access_time: AtomicU64,
}

impl RemapEntry {
    pub fn new(main_sector: Sector, spare_sector: Sector, length: u32) -> Self {
        RemapEntry {
            main_sector,
            spare_sector,
            length,
            state: std::sync::atomic::AtomicU8::new(state_to_u8(RemapState::Pending)),
            error_count: AtomicU32::new(0),
            access_time: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> RemapState {
        u8_to_state(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: RemapState) {
        self.state.store(state_to_u8(state), Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.state() == RemapState::Active
    }

    pub fn main_range(&self) -> SectorRange {
        SectorRange::new(self.main_sector, self.length)
    }

    pub fn spare_range(&self) -> SectorRange {
        SectorRange::new(self.spare_sector, self.length)
    }

    /// Sector on the spare device that `main_sector` (within this entry's
    /// range) maps to.
    pub fn translate(&self, main_sector: Sector) -> Sector {
        self.spare_sector + (main_sector - self.main_sector)
    }

    pub fn bump_error_count(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn touch(&self, now_micros: u64) {
        self.access_time.store(now_micros, Ordering::Relaxed);
    }

    pub fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    /// A snapshot of this entry suitable for serialization (the metadata
    /// engine never serializes the live atomics directly).
    pub fn snapshot(&self) -> RemapEntrySnapshot {
        RemapEntrySnapshot {
            main_sector: self.main_sector,
            spare_sector: self.spare_sector,
            length: self.length,
            state: self.state(),
            error_count: self.error_count(),
            access_time: self.access_time(),
        }
    }
}

impl From<RemapEntrySnapshot> for RemapEntry {
    fn from(s: RemapEntrySnapshot) -> Self {
        let entry = RemapEntry::new(s.main_sector, s.spare_sector, s.length);
        entry.set_state(s.state);
        entry.error_count.store(s.error_count, Ordering::Relaxed);
        entry.access_time.store(s.access_time, Ordering::Relaxed);
        entry
    }
}

/// Plain-data form of [`RemapEntry`], used for persistence (bincode) and
/// for returning owned copies out of the index's read-locked snapshot
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapEntrySnapshot {
    pub main_sector: Sector,
    pub spare_sector: Sector,
    pub length: u32,
    pub state: RemapState,
    pub error_count: u32,
    pub access_time: u64,
}

impl Serialize for RemapState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(state_to_u8(*self))
    }
}

impl<'de> Deserialize<'de> for RemapState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u8::deserialize(deserializer)?;
        Ok(u8_to_state(raw))
    }
}

fn state_to_u8(state: RemapState) -> u8 {
    match state {
        RemapState::Pending => 0,
        RemapState::Active => 1,
        RemapState::Failed => 2,
    }
}

fn u8_to_state(raw: u8) -> RemapState {
    match raw {
        0 => RemapState::Pending,
        2 => RemapState::Failed,
        _ => RemapState::Active,
    }
}
