//! Status report (spec.md §6): a stable-order, stable-meaning snapshot of
//! a running [`super::Device`], used by the `status`/`stats` messages and
//! the `remap-enginectl status` subcommand.

use serde::Serialize;

/// Positional fields 1-31 of spec.md §6. Field order and meaning are part
/// of the wire contract with existing tooling, so this struct's `Serialize`
/// derive order must not be reordered; new fields, if ever needed, are
/// appended rather than inserted.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub start_sector: u64,
    pub length_sectors: u64,
    pub target_type: String,
    pub version: String,
    pub main_device_path: String,
    pub spare_device_path: String,
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_remaps_created: u64,
    pub total_io_errors: u64,
    pub active_remap_count: u64,
    pub io_ops_completed: u64,
    pub total_io_time_ns: u64,
    pub avg_latency_ns: u64,
    pub throughput_bytes_per_sec: u64,
    pub sector_size: u32,
    pub spare_capacity_remaining_sectors: u64,
    pub total_ios: u64,
    pub normal_ios: u64,
    pub remapped_ios: u64,
    pub remapped_sector_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fast_path_hits: u64,
    pub slow_path_hits: u64,
    pub health_scans_performed: u64,
    pub health_score: u8,
    pub hotspot_count: u64,
    pub cache_hit_rate_percent: u8,
    pub operational_state: OperationalState,
    pub device_mode: DeviceMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationalState {
    Operational,
    Maintenance,
}

impl std::fmt::Display for OperationalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationalState::Operational => write!(f, "operational"),
            OperationalState::Maintenance => write!(f, "maintenance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Real,
    Demo,
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceMode::Real => write!(f, "real"),
            DeviceMode::Demo => write!(f, "demo"),
        }
    }
}

impl StatusReport {
    /// Positional rendering matching spec.md §6's field order, for
    /// tooling that expects the legacy line-oriented format rather than
    /// JSON.
    pub fn to_positional_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            self.start_sector,
            self.length_sectors,
            self.target_type,
            self.version,
            self.main_device_path,
            self.spare_device_path,
            self.total_reads,
            self.total_writes,
            self.total_remaps_created,
            self.total_io_errors,
            self.active_remap_count,
            self.io_ops_completed,
            self.total_io_time_ns,
            self.avg_latency_ns,
            self.throughput_bytes_per_sec,
            self.sector_size,
            self.spare_capacity_remaining_sectors,
            self.total_ios,
            self.normal_ios,
            self.remapped_ios,
            self.remapped_sector_count,
            self.cache_hits,
            self.cache_misses,
            self.fast_path_hits,
            self.slow_path_hits,
            self.health_scans_performed,
            self.health_score,
            self.hotspot_count,
            self.cache_hit_rate_percent,
            self.operational_state,
            self.device_mode,
        )
    }
}
