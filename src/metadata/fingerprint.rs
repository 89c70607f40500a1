//! Stable identification of the main device, so metadata reloaded from the
//! spare can be matched against the main device it was written for
//! (spec.md §3 `SetupDescriptor`, §4.6 `WrongMainDevice`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MainDeviceFingerprint {
    pub stable_id: Uuid,
    pub size_sectors: u64,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
}

impl MainDeviceFingerprint {
    pub fn new(
        stable_id: Uuid,
        size_sectors: u64,
        logical_block_size: u32,
        physical_block_size: u32,
    ) -> Self {
        MainDeviceFingerprint {
            stable_id,
            size_sectors,
            logical_block_size,
            physical_block_size,
        }
    }

    /// Whether `self` (loaded from metadata) matches a live main device's
    /// observed identity.
    pub fn matches(&self, other: &MainDeviceFingerprint) -> bool {
        self == other
    }
}
