//! Component F: device lifecycle (spec.md §4.6).
//!
//! A `Device` ties every other component into a constructible/destructible
//! unit: it owns the `RemapIndex`, the `MetadataEngine`, the spare
//! free-map, the error pipeline, and the background sync/resize workers.
//! Grounded on the teacher's `Nexus` construct/destroy lifecycle
//! (`mayastor/src/bdev/nexus/nexus_bdev.rs`: `Nexus::new`/`Nexus::destroy`
//! drive child-open, label reconstruction, and channel teardown the same
//! way `Device::construct`/`Device::destruct` drive backend-open, metadata
//! load, and worker teardown here).

pub mod discovery;
pub mod messages;
pub mod status;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use snafu::Snafu;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::RemapEngineConfig,
    core::{BackingDevice, OpenError, Request, Sector},
    error_pipeline::{ErrorPipeline, FreeMapError, PipelineError, SpareFreeMap},
    health,
    io_path::{self, RoutingError},
    metadata::{
        MainDeviceFingerprint, MetadataEngine, MetadataError, SpareDeviceLayout, TargetConfig,
    },
    remap::{IndexError, RemapEntry, RemapIndex, RemapState},
};

use status::{DeviceMode, OperationalState, StatusReport};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum DeviceError {
    #[snafu(display("failed to open {which}: {source}"))]
    Open { which: &'static str, source: OpenError },
    #[snafu(display(
        "metadata fingerprint does not match the main device presented at construction"
    ))]
    WrongMainDevice,
    #[snafu(display(
        "spare device too small: need at least {required} sectors, have {available}"
    ))]
    SpareTooSmall { required: u64, available: u64 },
    #[snafu(display("no remap covers sector {sector}"))]
    NoSuchRemap { sector: Sector },
    #[snafu(display("{source}"))]
    Index { source: IndexError },
    #[snafu(display("{source}"))]
    Metadata { source: MetadataError },
    #[snafu(display("{source}"))]
    Pipeline { source: PipelineError },
    #[snafu(display("{source}"))]
    Routing { source: RoutingError },
    #[snafu(display("{source}"))]
    Allocation { source: FreeMapError },
    #[snafu(display("{source}"))]
    Io { source: crate::core::IoError },
}

impl From<IndexError> for DeviceError {
    fn from(source: IndexError) -> Self {
        DeviceError::Index { source }
    }
}
impl From<MetadataError> for DeviceError {
    fn from(source: MetadataError) -> Self {
        DeviceError::Metadata { source }
    }
}
impl From<PipelineError> for DeviceError {
    fn from(source: PipelineError) -> Self {
        DeviceError::Pipeline { source }
    }
}
impl From<RoutingError> for DeviceError {
    fn from(source: RoutingError) -> Self {
        DeviceError::Routing { source }
    }
}
impl From<FreeMapError> for DeviceError {
    fn from(source: FreeMapError) -> Self {
        DeviceError::Allocation { source }
    }
}

/// Target-construction parameters (spec.md §6): `dmsetup`-style
/// positional arguments plus the bits conveyed out of band via the
/// messaging interface in a real deployment.
#[derive(Debug, Clone)]
pub struct ConstructParams {
    pub start_sector: Sector,
    pub length_sectors: Sector,
    pub target_type_name: String,
    pub main_device_path: String,
    pub spare_device_path: String,
    /// Stable identifier for the main device, when one is known (e.g. a
    /// SCSI page-0x83 id or filesystem UUID obtained by the caller). When
    /// `None`, fingerprint verification at construction is skipped (the
    /// common case for the in-process demo binary, which has no such
    /// identifier to offer).
    pub main_device_id: Option<Uuid>,
}

#[derive(Debug, Default)]
struct DeviceStats {
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    total_io_errors: AtomicU64,
    io_ops_completed: AtomicU64,
    total_io_time_ns: AtomicU64,
    normal_ios: AtomicU64,
    remapped_ios: AtomicU64,
    remapped_sector_count: AtomicU64,
    health_scans_performed: AtomicU64,
}

pub struct Device {
    main: Arc<dyn BackingDevice>,
    spare: Arc<dyn BackingDevice>,
    index: Arc<RemapIndex>,
    metadata: Arc<MetadataEngine>,
    free_map: Arc<SpareFreeMap>,
    pipeline: Arc<ErrorPipeline>,
    sync_worker: Arc<crate::metadata::SyncWorker>,
    fingerprint: MainDeviceFingerprint,
    target_config: TargetConfig,
    config: RemapEngineConfig,
    params: ConstructParams,
    device_mode: DeviceMode,
    active: Arc<AtomicBool>,
    cancelled: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    extra_spares: std::sync::Mutex<Vec<String>>,
    stats: DeviceStats,
}

impl Device {
    /// Construct (spec.md §4.6 "Construct"): opens both backends, loads
    /// or initializes metadata, sizes the index, and starts the
    /// background sync/resize workers.
    pub async fn construct(
        main: Arc<dyn BackingDevice>,
        spare: Arc<dyn BackingDevice>,
        params: ConstructParams,
        config: RemapEngineConfig,
        device_mode: DeviceMode,
    ) -> Result<Self, DeviceError> {
        config.validate().map_err(|_| DeviceError::WrongMainDevice)?;

        let required_spare = main.capacity() * (100 + config.spare_overhead_percent as u64) / 100
            + SpareDeviceLayout::data_region_start();
        if spare.capacity() < required_spare {
            return Err(DeviceError::SpareTooSmall {
                required: required_spare,
                available: spare.capacity(),
            });
        }

        let fingerprint = MainDeviceFingerprint::new(
            params.main_device_id.unwrap_or_else(Uuid::new_v4),
            main.capacity(),
            main.logical_block_size(),
            main.physical_block_size(),
        );
        let target_config = TargetConfig {
            sector_size: config.sector_size,
            flags: 0,
        };

        let persist_timeout = Duration::from_millis(config.persist_timeout_ms);
        let metadata = Arc::new(MetadataEngine::new(spare.clone(), persist_timeout));

        let (index, loaded_fingerprint) = match metadata.load().await {
            Ok(loaded) => {
                if let Some(expected_id) = params.main_device_id {
                    if loaded.header.fingerprint.stable_id != expected_id {
                        return Err(DeviceError::WrongMainDevice);
                    }
                }
                let index = RemapIndex::with_expected_count(loaded.entries.len());
                for snapshot in loaded.entries {
                    let _ = index.insert(Arc::new(RemapEntry::from(snapshot)));
                }
                (index, loaded.header.fingerprint)
            }
            Err(MetadataError::NoValidMetadata) => {
                let index = RemapIndex::new();
                let cancelled = CancellationToken::new();
                metadata
                    .persist(&[], fingerprint, target_config, &cancelled)
                    .await?;
                (index, fingerprint)
            }
            Err(e) => return Err(e.into()),
        };

        let free_map = Arc::new(SpareFreeMap::new(
            SpareDeviceLayout::data_region_start(),
            spare.capacity(),
        ));
        // Reclaim ranges already consumed by loaded entries so the
        // free-map does not hand out a spare range that is already live.
        for entry in index.snapshot() {
            if let Err(e) = free_map.allocate_exact(entry.spare_sector, entry.length) {
                warn!(
                    sector = entry.main_sector,
                    "loaded remap's spare range could not be reclaimed: {e}"
                );
            }
        }

        let active = Arc::new(AtomicBool::new(true));
        let cancelled = CancellationToken::new();
        let index = Arc::new(index);

        let pipeline = Arc::new(ErrorPipeline::new(
            index.clone(),
            metadata.clone(),
            free_map.clone(),
            spare.clone(),
            loaded_fingerprint,
            target_config,
            active.clone(),
            cancelled.clone(),
        ));
        let sync_worker = Arc::new(crate::metadata::SyncWorker::new());

        let mut device = Device {
            main,
            spare,
            index,
            metadata,
            free_map,
            pipeline,
            sync_worker,
            fingerprint: loaded_fingerprint,
            target_config,
            config,
            params,
            device_mode,
            active,
            cancelled,
            workers: std::sync::Mutex::new(Vec::new()),
            extra_spares: std::sync::Mutex::new(Vec::new()),
            stats: DeviceStats::default(),
        };
        device.start_workers();
        Ok(device)
    }

    fn start_workers(&mut self) {
        let sync_worker = self.sync_worker.clone();
        let index = self.index.clone();
        let metadata = self.metadata.clone();
        let fingerprint = self.fingerprint;
        let target_config = self.target_config;
        let cancelled = self.cancelled.clone();
        let sync_handle = tokio::spawn(async move {
            sync_worker
                .run(index, metadata, fingerprint, target_config, cancelled)
                .await;
        });

        let index = self.index.clone();
        let cancelled = self.cancelled.clone();
        let resize_handle = tokio::spawn(async move {
            resize_worker_loop(index, cancelled).await;
        });

        let mut workers = self.workers.lock().unwrap();
        workers.push(sync_handle);
        workers.push(resize_handle);
    }

    /// Destruct (spec.md §4.6 "Destruct"): stop accepting new work, flip
    /// cancellation so every background suspension point observes it,
    /// join workers with a bounded timeout, and release backends.
    pub async fn destruct(self) {
        self.active.store(false, Ordering::Release);
        self.cancelled.cancel();
        self.sync_worker.mark_dirty(); // wake the sync loop so it observes cancellation promptly

        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("background worker did not join within teardown timeout");
            }
        }

        self.main.close().await;
        self.spare.close().await;
        debug!("device torn down");
    }

    /// The I/O path + error pipeline, combined (spec.md §4.4 steps 1-4,
    /// §4.5). `buf` must be sized for `request.length` sectors.
    pub async fn handle_request(
        &self,
        mut request: Request,
        buf: &mut [u8],
    ) -> Result<(), DeviceError> {
        let started = std::time::Instant::now();
        match request.op {
            crate::core::Op::Read | crate::core::Op::ReadAhead => {
                self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
            }
        }

        let routing = io_path::map(&self.index, &mut request)?;
        match routing {
            io_path::Routing::Passthrough => {
                self.stats.normal_ios.fetch_add(1, Ordering::Relaxed);
            }
            io_path::Routing::Remapped { .. } => {
                self.stats.remapped_ios.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .remapped_sector_count
                    .fetch_add(request.length as u64, Ordering::Relaxed);
            }
        }

        let result = io_path::submit(&self.main, &self.spare, &request, buf).await;
        let final_result = self.pipeline.end_io(&request, result).await;

        if final_result.is_err() {
            self.stats.total_io_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.io_ops_completed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_io_time_ns
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        self.maybe_schedule_resize();
        final_result.map_err(|source| DeviceError::Io { source })
    }

    fn maybe_schedule_resize(&self) {
        if let Some(direction) = self.index.check_resize_needed() {
            self.index.resize(direction);
        }
    }

    /// Creates a remap for a caller-chosen `spare_sector` (spec.md §6
    /// `add_remap <main> <spare> <len>`). Reserves the spare range in the
    /// free-map before inserting (and releases it again on any failure),
    /// so a concurrent error-pipeline allocation can never be handed an
    /// overlapping range (spec.md §3/P2) and `remove_remap`'s `release`
    /// always matches a real reservation.
    pub async fn add_remap(
        &self,
        main_sector: Sector,
        spare_sector: Sector,
        length: u32,
    ) -> Result<(), DeviceError> {
        self.free_map.allocate_exact(spare_sector, length)?;

        let entry = Arc::new(RemapEntry::new(main_sector, spare_sector, length));
        entry.set_state(RemapState::Pending);
        if let Err(e) = self.index.insert(entry.clone()) {
            self.free_map.release(spare_sector, length);
            return Err(e.into());
        }

        let snapshot: Vec<_> = self.index.snapshot().iter().map(|e| e.snapshot()).collect();
        if let Err(e) = self
            .metadata
            .persist(&snapshot, self.fingerprint, self.target_config, &self.cancelled)
            .await
        {
            self.index.remove(main_sector);
            self.free_map.release(spare_sector, length);
            return Err(e.into());
        }

        entry.set_state(RemapState::Active);
        self.maybe_schedule_resize();
        Ok(())
    }

    pub async fn remove_remap(&self, main_sector: Sector) -> Result<(), DeviceError> {
        let entry = self
            .index
            .remove(main_sector)
            .ok_or(DeviceError::NoSuchRemap { sector: main_sector })?;
        self.free_map.release(entry.spare_sector, entry.length);
        self.sync_worker.mark_dirty();
        self.maybe_schedule_resize();
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), DeviceError> {
        for entry in self.index.snapshot() {
            self.index.remove(entry.main_sector);
            self.free_map.release(entry.spare_sector, entry.length);
        }
        self.force_save().await
    }

    pub async fn force_save(&self) -> Result<(), DeviceError> {
        let snapshot: Vec<_> = self.index.snapshot().iter().map(|e| e.snapshot()).collect();
        self.metadata
            .persist(&snapshot, self.fingerprint, self.target_config, &self.cancelled)
            .await?;
        Ok(())
    }

    pub fn metadata_version(&self) -> u64 {
        self.metadata.version_counter()
    }

    pub fn spare_add(&self, path: String) {
        self.extra_spares.lock().unwrap().push(path);
    }

    pub fn spare_remove(&self, path: &str) {
        self.extra_spares.lock().unwrap().retain(|p| p != path);
    }

    /// Assembles the positional status report (spec.md §6).
    pub fn status(&self) -> StatusReport {
        self.stats
            .health_scans_performed
            .fetch_add(1, Ordering::Relaxed);

        let pipeline_stats = self.pipeline.stats();
        let active_remaps = self.index.len() as u64;
        let total_errors: u64 = self
            .index
            .snapshot()
            .iter()
            .map(|e| e.error_count() as u64)
            .sum();
        let hotspots = health::hotspot_count(
            self.index
                .snapshot()
                .iter()
                .map(|e| (e.main_sector, e.error_count())),
        );
        let health_score = health::health_score(active_remaps, total_errors, self.main.capacity());

        let io_ops = self.stats.io_ops_completed.load(Ordering::Relaxed);
        let total_time_ns = self.stats.total_io_time_ns.load(Ordering::Relaxed);
        let avg_latency_ns = if io_ops > 0 { total_time_ns / io_ops } else { 0 };
        let throughput = if total_time_ns > 0 {
            (io_ops * self.config.sector_size as u64) * 1_000_000_000 / total_time_ns
        } else {
            0
        };

        let fast_path_hits = self.stats.remapped_ios.load(Ordering::Relaxed);
        let slow_path_hits = self.stats.normal_ios.load(Ordering::Relaxed);
        let total_ios = fast_path_hits + slow_path_hits;
        let cache_hit_rate = if total_ios > 0 {
            (fast_path_hits * 100 / total_ios) as u8
        } else {
            0
        };

        StatusReport {
            start_sector: self.params.start_sector,
            length_sectors: self.params.length_sectors,
            target_type: self.params.target_type_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            main_device_path: self.params.main_device_path.clone(),
            spare_device_path: self.params.spare_device_path.clone(),
            total_reads: self.stats.total_reads.load(Ordering::Relaxed),
            total_writes: self.stats.total_writes.load(Ordering::Relaxed),
            total_remaps_created: pipeline_stats.remaps_created,
            total_io_errors: self.stats.total_io_errors.load(Ordering::Relaxed),
            active_remap_count: active_remaps,
            io_ops_completed: io_ops,
            total_io_time_ns: total_time_ns,
            avg_latency_ns,
            throughput_bytes_per_sec: throughput,
            sector_size: self.config.sector_size,
            spare_capacity_remaining_sectors: self.pipeline.spare_capacity_remaining(),
            total_ios,
            normal_ios: slow_path_hits,
            remapped_ios: fast_path_hits,
            remapped_sector_count: self.stats.remapped_sector_count.load(Ordering::Relaxed),
            cache_hits: fast_path_hits,
            cache_misses: slow_path_hits,
            fast_path_hits,
            slow_path_hits,
            health_scans_performed: self.stats.health_scans_performed.load(Ordering::Relaxed),
            health_score,
            hotspot_count: hotspots as u64,
            cache_hit_rate_percent: cache_hit_rate,
            operational_state: if self.active.load(Ordering::Acquire)
                && !self.cancelled.is_cancelled()
            {
                OperationalState::Operational
            } else {
                OperationalState::Maintenance
            },
            device_mode: self.device_mode,
        }
    }

    pub fn index(&self) -> &Arc<RemapIndex> {
        &self.index
    }
}

/// Background resize worker (spec.md §4.2 resize step "performed by a
/// background worker"): periodically checks whether the index needs to
/// grow or shrink and performs the resize, exiting promptly once
/// cancellation is observed (spec.md §5 "every background job observes a
/// cancellation flag").
async fn resize_worker_loop(index: Arc<RemapIndex>, cancelled: CancellationToken) {
    let poll_interval = Duration::from_millis(50);
    loop {
        if cancelled.is_cancelled() {
            debug!("resize worker observed cancellation, exiting");
            return;
        }
        if let Some(direction) = index.check_resize_needed() {
            index.resize(direction);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = cancelled.cancelled() => return,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("main_device_path", &self.params.main_device_path)
            .field("spare_device_path", &self.params.spare_device_path)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}
