//! In-memory backing device, used by tests and the demo CLI's "--demo"
//! mode (spec.md §6, field 31 `device mode (real|demo)`).
//!
//! Grounded on the teacher's `io-engine/src/bdev/malloc.rs`: "the malloc
//! bdev ... creates an in memory disk." Ours additionally supports fault
//! injection so tests can deterministically exercise the error pipeline
//! (spec.md S2/S3) without a real failing device.

use std::{
    collections::HashSet,
    sync::Mutex,
};

use async_trait::async_trait;

use super::{backing_device::BackingDevice, io_error::IoError, sector::Sector};

/// A single injected fault: the next I/O touching `sector` with a matching
/// op-class fails with `kind` once, then clears itself.
#[derive(Debug, Clone, Copy)]
pub struct InjectedFault {
    pub sector: Sector,
    pub write_class: bool,
    pub kind: FaultKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Medium,
    Fatal,
}

#[derive(Debug)]
pub struct MemBackend {
    name: String,
    block_size: u32,
    data: Mutex<Vec<u8>>,
    faults: Mutex<Vec<InjectedFault>>,
    failed_sectors: Mutex<HashSet<Sector>>,
}

impl MemBackend {
    pub fn new(name: impl Into<String>, capacity_sectors: Sector, block_size: u32) -> Self {
        MemBackend {
            name: name.into(),
            block_size,
            data: Mutex::new(vec![0u8; (capacity_sectors * block_size as u64) as usize]),
            faults: Mutex::new(Vec::new()),
            failed_sectors: Mutex::new(HashSet::new()),
        }
    }

    /// Arranges for the next matching I/O to fail, then self-clears.
    pub fn inject_fault(&self, fault: InjectedFault) {
        self.faults.lock().unwrap().push(fault);
    }

    /// Permanently fails all I/O to `sector` (used to simulate a spare
    /// copy that is itself bad, spec.md §4.5 step 2).
    pub fn fail_sector_permanently(&self, sector: Sector) {
        self.failed_sectors.lock().unwrap().insert(sector);
    }

    fn take_fault(&self, sector: Sector, write_class: bool) -> Option<FaultKind> {
        if self.failed_sectors.lock().unwrap().contains(&sector) {
            return Some(FaultKind::Medium);
        }
        let mut faults = self.faults.lock().unwrap();
        if let Some(pos) = faults
            .iter()
            .position(|f| f.sector == sector && f.write_class == write_class)
        {
            return Some(faults.remove(pos).kind);
        }
        None
    }

    fn offset(&self, sector: Sector) -> usize {
        (sector * self.block_size as u64) as usize
    }
}

#[async_trait]
impl BackingDevice for MemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capacity(&self) -> Sector {
        self.data.lock().unwrap().len() as u64 / self.block_size as u64
    }

    fn logical_block_size(&self) -> u32 {
        self.block_size
    }

    fn physical_block_size(&self) -> u32 {
        self.block_size
    }

    async fn read_at(&self, sector: Sector, len: u32, buf: &mut [u8]) -> Result<(), IoError> {
        if let Some(kind) = self.take_fault(sector, false) {
            return Err(fault_to_error(kind, &self.name, sector));
        }
        let start = self.offset(sector);
        let n = len as usize * self.block_size as usize;
        let data = self.data.lock().unwrap();
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(())
    }

    async fn write_at(&self, sector: Sector, len: u32, buf: &[u8]) -> Result<(), IoError> {
        if let Some(kind) = self.take_fault(sector, true) {
            return Err(fault_to_error(kind, &self.name, sector));
        }
        let start = self.offset(sector);
        let n = len as usize * self.block_size as usize;
        let mut data = self.data.lock().unwrap();
        data[start..start + n].copy_from_slice(&buf[..n]);
        Ok(())
    }

    async fn write_zeroes_at(&self, sector: Sector, len: u32) -> Result<(), IoError> {
        if let Some(kind) = self.take_fault(sector, true) {
            return Err(fault_to_error(kind, &self.name, sector));
        }
        let start = self.offset(sector);
        let n = len as usize * self.block_size as usize;
        let mut data = self.data.lock().unwrap();
        data[start..start + n].iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    async fn discard_at(&self, sector: Sector, len: u32) -> Result<(), IoError> {
        self.write_zeroes_at(sector, len).await
    }

    async fn close(&self) {}
}

fn fault_to_error(kind: FaultKind, device: &str, sector: Sector) -> IoError {
    match kind {
        FaultKind::Medium => IoError::Medium {
            errno: libc::EIO,
            device: device.to_string(),
            sector,
        },
        FaultKind::Fatal => IoError::Fatal {
            errno: libc::EIO,
            device: device.to_string(),
        },
    }
}
