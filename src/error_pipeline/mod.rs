//! Component E: the error -> remap pipeline (spec.md §4.5).
//!
//! Consumes the I/O path's end-of-I/O completions. A medium error on a
//! READ-class request always propagates; a medium error on a WRITE-class
//! request triggers write-ahead creation of a new remap and, if the spare
//! has capacity, the error is cleared before it reaches the filesystem
//! (spec.md §4.5 "Rationale for write-error suppression"). Grounded on the
//! teacher's `CoreError`/end-of-I/O completion idiom in
//! `mayastor/src/bdev/nexus/nexus_io.rs`, generalized from "retire a failed
//! child" to "create and write-ahead-persist a sector remap."

mod free_map;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use snafu::Snafu;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{BackingDevice, IoError, IoResult, Op, Request, Sector, Target},
    metadata::{MainDeviceFingerprint, MetadataEngine, MetadataError, TargetConfig},
    remap::{RemapEntry, RemapIndex, RemapState},
};

pub use free_map::{FreeMapError, SpareFreeMap};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum PipelineError {
    #[snafu(display("{source}"))]
    Allocation { source: FreeMapError },
    #[snafu(display("{source}"))]
    Persist { source: MetadataError },
}

impl From<FreeMapError> for PipelineError {
    fn from(source: FreeMapError) -> Self {
        PipelineError::Allocation { source }
    }
}

impl From<MetadataError> for PipelineError {
    fn from(source: MetadataError) -> Self {
        PipelineError::Persist { source }
    }
}

/// Running counters surfaced in the status report (spec.md §6 fields
/// 9-10, 18-21).
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub remaps_created: AtomicU64,
    pub read_errors_propagated: AtomicU64,
    pub write_errors_suppressed: AtomicU64,
    pub write_errors_hard_failed: AtomicU64,
    pub spare_failures: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            remaps_created: self.remaps_created.load(Ordering::Relaxed),
            read_errors_propagated: self.read_errors_propagated.load(Ordering::Relaxed),
            write_errors_suppressed: self.write_errors_suppressed.load(Ordering::Relaxed),
            write_errors_hard_failed: self.write_errors_hard_failed.load(Ordering::Relaxed),
            spare_failures: self.spare_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStatsSnapshot {
    pub remaps_created: u64,
    pub read_errors_propagated: u64,
    pub write_errors_suppressed: u64,
    pub write_errors_hard_failed: u64,
    pub spare_failures: u64,
}

/// Wires together the pieces `end_io` needs: the index it creates remaps
/// in, the metadata engine it write-ahead-persists through, the spare
/// free-map it allocates destination ranges from, and the device-lifecycle
/// flags that gate suppression (spec.md §4.5 step 5b: "spare handle is
/// healthy and the device is not mid-teardown").
pub struct ErrorPipeline {
    index: Arc<RemapIndex>,
    metadata: Arc<MetadataEngine>,
    free_map: Arc<SpareFreeMap>,
    spare: Arc<dyn BackingDevice>,
    fingerprint: MainDeviceFingerprint,
    target_config: TargetConfig,
    active: Arc<AtomicBool>,
    cancelled: CancellationToken,
    stats: PipelineStats,
}

impl ErrorPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<RemapIndex>,
        metadata: Arc<MetadataEngine>,
        free_map: Arc<SpareFreeMap>,
        spare: Arc<dyn BackingDevice>,
        fingerprint: MainDeviceFingerprint,
        target_config: TargetConfig,
        active: Arc<AtomicBool>,
        cancelled: CancellationToken,
    ) -> Self {
        ErrorPipeline {
            index,
            metadata,
            free_map,
            spare,
            fingerprint,
            target_config,
            active,
            cancelled,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn spare_capacity_remaining(&self) -> u64 {
        self.free_map.remaining()
    }

    /// The end-of-I/O hook (spec.md §4.5). Returns the result that should
    /// be delivered to the host framework's completion callback, which may
    /// differ from `result` if a WRITE-class medium error was suppressed.
    pub async fn end_io(&self, request: &Request, result: IoResult) -> IoResult {
        let error = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if request.target == Target::Spare {
            // The spare copy itself failed: the mapping is poison. No new
            // remap can fix a bad spare sector, so mark it FAILED and
            // propagate unchanged (spec.md §4.5 step 2).
            if let Some(entry) = self.index.find(request.original_sector) {
                entry.set_state(RemapState::Failed);
                self.stats.spare_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sector = request.original_sector,
                    "spare copy failed, remap marked FAILED"
                );
            }
            return Err(error);
        }

        if !error.is_medium() {
            // Transient/Fatal/Cancelled on main: not ours to recover.
            return Err(error);
        }

        if request.op.is_read_class() {
            // READ-class: the source of truth for this data is gone.
            // Suppressing would serve stale or wrong data.
            self.stats
                .read_errors_propagated
                .fetch_add(1, Ordering::Relaxed);
            return Err(error);
        }

        self.handle_write_failure(request, error).await
    }

    /// WRITE-class medium error path (spec.md §4.5 step 5).
    async fn handle_write_failure(&self, request: &Request, error: IoError) -> IoResult {
        let failed_sector = request.original_sector;

        if let Some(existing) = self.index.find(failed_sector) {
            // Deduplicate: a remap already covers this sector (spec.md
            // §4.5 step 5a). Whether it is safe to suppress still depends
            // on device/spare health, independent of whether we just
            // created the entry or found one from an earlier failure.
            return self.decide_suppression(matches!(
                existing.state(),
                RemapState::Pending | RemapState::Active
            ), error);
        }

        if !self.capacity_and_health_ok(request.length) {
            self.stats
                .write_errors_hard_failed
                .fetch_add(1, Ordering::Relaxed);
            error!(
                sector = failed_sector,
                "write error on main not suppressed: spare at capacity or device inactive"
            );
            return Err(error);
        }

        match self.create_remap(failed_sector, request.length).await {
            Ok(()) => {
                self.stats.remaps_created.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .write_errors_suppressed
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                warn!("remap creation failed for sector {failed_sector}: {e}");
                self.stats
                    .write_errors_hard_failed
                    .fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    fn decide_suppression(&self, dedup_found: bool, error: IoError) -> IoResult {
        if dedup_found && self.capacity_and_health_ok(0) {
            self.stats
                .write_errors_suppressed
                .fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            self.stats
                .write_errors_hard_failed
                .fetch_add(1, Ordering::Relaxed);
            Err(error)
        }
    }

    fn capacity_and_health_ok(&self, requested_length: u32) -> bool {
        self.active.load(Ordering::Acquire)
            && !self.cancelled.is_cancelled()
            && self.free_map.remaining() >= requested_length as u64
    }

    /// Allocates a spare range, inserts a PENDING entry so it is
    /// immediately visible to `find` (for dedup and diagnostics — the I/O
    /// path's routing logic still only redirects ACTIVE entries, spec.md
    /// §4.4), write-ahead persists it, then flips it to ACTIVE. See
    /// DESIGN.md for why insertion happens before persist rather than
    /// after.
    async fn create_remap(&self, failed_sector: Sector, length: u32) -> Result<(), PipelineError> {
        let spare_sector = self.free_map.allocate(length.max(1))?;
        let entry = Arc::new(RemapEntry::new(failed_sector, spare_sector, length.max(1)));

        if self.index.insert(entry.clone()).is_err() {
            // Lost a race with a concurrent failure on the same sector;
            // the winner's entry already covers it.
            self.free_map.release(spare_sector, length.max(1));
            return Ok(());
        }

        let snapshot: Vec<_> = self.index.snapshot().iter().map(|e| e.snapshot()).collect();
        let persist_result = self
            .metadata
            .persist(
                &snapshot,
                self.fingerprint,
                self.target_config,
                &self.cancelled,
            )
            .await;

        match persist_result {
            Ok(version) => {
                entry.set_state(RemapState::Active);
                debug!(
                    sector = failed_sector,
                    spare_sector, version, "remap write-ahead persisted and activated"
                );
                Ok(())
            }
            Err(e) => {
                // persist-fail: drop the PENDING entry (spec.md state
                // machine), release its spare range, and surface the
                // original error instead of suppressing it.
                self.index.remove(failed_sector);
                self.free_map.release(spare_sector, length.max(1));
                Err(e.into())
            }
        }
    }
}

/// `spec.md §4.5 step 3`: classifies an `Op` for the error pipeline.
pub fn is_write_class(op: Op) -> bool {
    op.is_write_class()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MemBackend, Request};
    use std::time::Duration;

    fn pipeline() -> (ErrorPipeline, Arc<RemapIndex>) {
        let index = Arc::new(RemapIndex::new());
        let spare = Arc::new(MemBackend::new("spare", 20_000, 512));
        let metadata = Arc::new(MetadataEngine::new(spare.clone(), Duration::from_secs(1)));
        let free_map = Arc::new(SpareFreeMap::new(16_384, 20_000));
        let fingerprint = MainDeviceFingerprint::new(uuid::Uuid::nil(), 1_000_000, 512, 512);
        let target_config = TargetConfig {
            sector_size: 512,
            flags: 0,
        };
        let active = Arc::new(AtomicBool::new(true));
        let cancelled = CancellationToken::new();
        let pipeline = ErrorPipeline::new(
            index.clone(),
            metadata,
            free_map,
            spare,
            fingerprint,
            target_config,
            active,
            cancelled,
        );
        (pipeline, index)
    }

    #[tokio::test]
    async fn write_error_is_suppressed_and_creates_remap() {
        let (pipeline, index) = pipeline();
        let request = Request::new(Op::Write, 100, 1);
        let err = IoError::Medium {
            errno: libc::EIO,
            device: "main".into(),
            sector: 100,
        };
        let result = pipeline.end_io(&request, Err(err)).await;
        assert!(result.is_ok());
        let entry = index.find(100).expect("remap created");
        assert_eq!(entry.state(), RemapState::Active);
        assert_eq!(pipeline.stats().remaps_created, 1);
    }

    #[tokio::test]
    async fn read_error_is_never_suppressed() {
        let (pipeline, index) = pipeline();
        let request = Request::new(Op::Read, 100, 1);
        let err = IoError::Medium {
            errno: libc::EIO,
            device: "main".into(),
            sector: 100,
        };
        let result = pipeline.end_io(&request, Err(err)).await;
        assert!(result.is_err());
        assert!(index.find(100).is_none());
    }

    #[tokio::test]
    async fn duplicate_failures_do_not_create_second_remap() {
        let (pipeline, index) = pipeline();
        let request = Request::new(Op::Write, 100, 1);
        let err = || IoError::Medium {
            errno: libc::EIO,
            device: "main".into(),
            sector: 100,
        };
        pipeline.end_io(&request, Err(err())).await.unwrap();
        pipeline.end_io(&request, Err(err())).await.unwrap();
        assert_eq!(pipeline.stats().remaps_created, 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn spare_failure_marks_entry_failed() {
        let (pipeline, index) = pipeline();
        let write_request = Request::new(Op::Write, 100, 1);
        pipeline
            .end_io(
                &write_request,
                Err(IoError::Medium {
                    errno: libc::EIO,
                    device: "main".into(),
                    sector: 100,
                }),
            )
            .await
            .unwrap();

        let mut spare_request = Request::new(Op::Read, 100, 1);
        let entry = index.find(100).unwrap();
        spare_request.route_to_spare(entry.spare_sector);
        let result = pipeline
            .end_io(
                &spare_request,
                Err(IoError::Medium {
                    errno: libc::EIO,
                    device: "spare".into(),
                    sector: entry.spare_sector,
                }),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(index.find(100).unwrap().state(), RemapState::Failed);
    }
}
