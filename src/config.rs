//! Engine-wide configuration.
//!
//! Partial configs are supported: any field omitted from a YAML/JSON config
//! document is filled in with its default (`serde`'s `#[serde(default)]`
//! fills gaps the same way `subsys::config` does it for bdev/nexus options),
//! so an operator only has to spell out the values they want to change.

use serde::{Deserialize, Serialize};

/// Minimum bucket count for the remap index (spec.md §3, `MIN_BUCKETS`).
pub const MIN_BUCKETS: usize = 64;

/// Load-factor band the index is kept within outside of a resize.
pub const LOAD_LOW: f64 = 0.5;
pub const LOAD_HIGH: f64 = 1.5;

/// Number of redundant metadata copies written to the spare device.
pub const METADATA_COPIES: usize = 5;

/// Fixed sector offsets for the redundant metadata copies (spec.md §3).
pub const METADATA_COPY_SECTORS: [u64; METADATA_COPIES] =
    [0, 1024, 2048, 4096, 8192];

/// First sector of the spare data region (targets of `spare_sector`).
pub const SPARE_DATA_REGION_START: u64 = 16384;

/// Default reassembly confidence threshold below which a reconstructor
/// refuses to reassemble a device (spec.md §4.6).
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 70;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapEngineConfig {
    /// Size of a sector in bytes. Must be a power of two.
    pub sector_size: u32,
    /// Fraction (percent) of main-device capacity the spare must exceed to
    /// be accepted at construction, on top of the fixed metadata region.
    pub spare_overhead_percent: u32,
    /// Bound on a single metadata persist, in milliseconds.
    pub persist_timeout_ms: u64,
    /// Minimum confidence score (0-100) required to reassemble a device
    /// from discovered metadata.
    pub reassembly_confidence_threshold: u8,
    /// Number of concurrent background workers (resize, sync, remap
    /// creation) the device may run.
    pub worker_pool_size: usize,
}

impl Default for RemapEngineConfig {
    fn default() -> Self {
        RemapEngineConfig {
            sector_size: 512,
            spare_overhead_percent: 5,
            persist_timeout_ms: 5_000,
            reassembly_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            worker_pool_size: 4,
        }
    }
}

impl RemapEngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.sector_size.is_power_of_two() {
            return Err(format!(
                "sector_size must be a power of two, got {}",
                self.sector_size
            ));
        }
        if self.reassembly_confidence_threshold > 100 {
            return Err(format!(
                "reassembly_confidence_threshold must be <= 100, got {}",
                self.reassembly_confidence_threshold
            ));
        }
        Ok(())
    }
}
