//! Fixed on-spare layout (spec.md §3 `SpareDeviceLayout`, §6).
//!
//! ```text
//! sector 0          : copy 0
//! sector 1024       : copy 1
//! sector 2048       : copy 2
//! sector 4096       : copy 3
//! sector 8192       : copy 4
//! sector 16384..end : spare data region (spare_sector targets)
//! ```

use crate::{
    config::{METADATA_COPY_SECTORS, SPARE_DATA_REGION_START},
    core::Sector,
};

/// Number of sectors reserved per metadata copy slot. Generous enough that
/// a header plus a few thousand remap entries never collides with the
/// next copy's slot at the default 512-byte sector size.
pub const COPY_SLOT_SECTORS: u64 = 1024;

#[derive(Debug, Clone, Copy)]
pub struct SpareDeviceLayout;

impl SpareDeviceLayout {
    pub fn copy_sectors() -> &'static [Sector] {
        &METADATA_COPY_SECTORS
    }

    pub fn data_region_start() -> Sector {
        SPARE_DATA_REGION_START
    }

    /// Whether `[sector, sector+length)` lies entirely inside the spare
    /// data region (spec.md §3 invariant `spare_sector + length <=
    /// spare_data_region_end`).
    pub fn in_data_region(sector: Sector, length: u32, spare_capacity: Sector) -> bool {
        sector >= Self::data_region_start() && sector + length as Sector <= spare_capacity
    }
}
