//! Component C: the metadata engine (spec.md §4.3).
//!
//! Persists the remap index and device configuration redundantly across
//! five fixed-sector copies on the spare device, each copy fully
//! self-describing (header + body + CRCs), and reloads by picking the
//! highest-`version_counter` copy that still verifies. Grounded on the
//! teacher's legacy nexus metadata code
//! (`mayastor/src/bdev/nexus/nexus_metadata.rs`): same bincode + CRC32
//! discipline, same "pick the newest valid copy" load rule, adapted from a
//! single GPT-partition index to five fixed, widely separated sectors so
//! it survives localized media damage rather than partition-table loss.

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{BackingDevice, IoError},
    remap::RemapEntrySnapshot,
};

use super::{
    body,
    fingerprint::MainDeviceFingerprint,
    header::{HeaderError, MetadataHeader, TargetConfig},
    layout::{SpareDeviceLayout, COPY_SLOT_SECTORS},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum MetadataError {
    #[snafu(display("no valid metadata found on spare device"))]
    NoValidMetadata,
    #[snafu(display("failed to persist metadata: no copy could be written"))]
    PersistFailed,
    #[snafu(display("spare device has no remaining capacity for metadata"))]
    SpareFull,
    #[snafu(display("fatal I/O error persisting metadata: {source}"))]
    IoFatal { source: IoError },
    #[snafu(display("metadata persist was cancelled"))]
    Cancelled,
    #[snafu(display("metadata persist timed out"))]
    Timeout,
    #[snafu(display("{source}"))]
    Header { source: HeaderError },
    #[snafu(display("{source}"))]
    Body { source: body::BodyError },
}

impl From<HeaderError> for MetadataError {
    fn from(source: HeaderError) -> Self {
        MetadataError::Header { source }
    }
}

impl From<body::BodyError> for MetadataError {
    fn from(source: body::BodyError) -> Self {
        MetadataError::Body { source }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCopy {
    header: MetadataHeader,
    body: Vec<u8>,
}

/// Result of a successful [`MetadataEngine::load`].
pub struct LoadedMetadata {
    pub header: MetadataHeader,
    pub entries: Vec<RemapEntrySnapshot>,
    /// How many of the five copies verified; used to feed the confidence
    /// score (spec.md §4.6).
    pub valid_copies: usize,
}

pub struct MetadataEngine {
    spare: Arc<dyn BackingDevice>,
    version_counter: AtomicU64,
    persist_timeout: Duration,
    /// Serializes "initiate persist" (spec.md §5 shared-resources table:
    /// "Metadata write path - One in flight at a time - Mutex around
    /// 'initiate persist'"). Held from the version-counter read through
    /// the last copy write, so two concurrent callers (the sync worker,
    /// the error pipeline, `add_remap`/`force_save`/`clear_all`) can never
    /// both bump and write the same `next_version` with different bodies.
    persist_lock: tokio::sync::Mutex<()>,
}

impl MetadataEngine {
    pub fn new(spare: Arc<dyn BackingDevice>, persist_timeout: Duration) -> Self {
        MetadataEngine {
            spare,
            version_counter: AtomicU64::new(0),
            persist_timeout,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn version_counter(&self) -> u64 {
        self.version_counter.load(Ordering::Acquire)
    }

    async fn write_copy(&self, sector: u64, bytes: &[u8]) -> Result<(), IoError> {
        let block_size = self.spare.logical_block_size() as usize;
        let slot_bytes = COPY_SLOT_SECTORS as usize * block_size;
        let mut buf = vec![0u8; slot_bytes.max(bytes.len().div_ceil(block_size) * block_size)];
        buf[..bytes.len()].copy_from_slice(bytes);
        let len_sectors = (buf.len() / block_size) as u32;
        self.spare.write_at(sector, len_sectors, &buf).await
    }

    async fn read_copy(&self, sector: u64) -> Result<StoredCopy, MetadataError> {
        let block_size = self.spare.logical_block_size() as usize;
        let slot_bytes = COPY_SLOT_SECTORS as usize * block_size;
        let mut buf = vec![0u8; slot_bytes];
        self.spare
            .read_at(sector, COPY_SLOT_SECTORS as u32, &mut buf)
            .await
            .map_err(|source| MetadataError::IoFatal { source })?;

        let stored: StoredCopy =
            bincode::deserialize(&buf).map_err(|_| MetadataError::NoValidMetadata)?;
        stored.header.verify()?;
        stored.header.verify_body(body::checksum(&stored.body))?;
        Ok(stored)
    }

    /// Persists `entries` across the five fixed copies, write-ahead of any
    /// caller making them observable (spec.md §4.5/§5: the write-ahead
    /// rule). A cancellation flag is polled before each copy submission
    /// and after each completion; copies already written when cancellation
    /// is observed remain valid, since they already carry the new
    /// `version_counter` (spec.md §4.3 step 4).
    pub async fn persist(
        &self,
        entries: &[RemapEntrySnapshot],
        fingerprint: MainDeviceFingerprint,
        target_config: TargetConfig,
        cancelled: &CancellationToken,
    ) -> Result<u64, MetadataError> {
        // Held for the whole operation, not just the counter bump: two
        // overlapping persists reading the same `next_version` and writing
        // different bodies under it would violate both P4 (strict
        // monotonicity) and "copies with equal counters must be
        // byte-identical" (spec.md §4.3).
        let _guard = self.persist_lock.lock().await;

        let body_bytes = body::encode(entries)?;
        let body_crc = body::checksum(&body_bytes);
        let next_version = self.version_counter.load(Ordering::Acquire) + 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        let header = MetadataHeader::new(
            next_version,
            entries.len() as u32,
            body_crc,
            now,
            fingerprint,
            target_config,
        );
        let stored = StoredCopy {
            header,
            body: body_bytes,
        };
        let bytes = bincode::serialize(&stored).map_err(|_| MetadataError::PersistFailed)?;

        let mut successes = 0usize;
        for &sector in SpareDeviceLayout::copy_sectors() {
            if cancelled.is_cancelled() {
                break;
            }
            match timeout(self.persist_timeout, self.write_copy(sector, &bytes)).await {
                Ok(Ok(())) => successes += 1,
                Ok(Err(source)) => {
                    warn!("metadata copy at sector {sector} failed to write: {source}");
                }
                Err(_) => {
                    warn!("metadata copy at sector {sector} timed out, cancelling persist");
                    return if successes > 0 {
                        self.version_counter.store(next_version, Ordering::Release);
                        Ok(next_version)
                    } else {
                        Err(MetadataError::Timeout)
                    };
                }
            }
            if cancelled.is_cancelled() {
                break;
            }
        }

        if successes == 0 {
            return if cancelled.is_cancelled() {
                Err(MetadataError::Cancelled)
            } else {
                Err(MetadataError::PersistFailed)
            };
        }

        self.version_counter.store(next_version, Ordering::Release);
        debug!(
            version = next_version,
            copies_written = successes,
            "metadata persist durable"
        );
        Ok(next_version)
    }

    /// Loads the newest valid copy. Copies that fail CRC/magic validation
    /// are discarded silently (spec.md §4.3 step 2); if none validate the
    /// caller gets `NoValidMetadata` and may choose to initialize fresh
    /// (spec.md §4.6 step 3).
    pub async fn load(&self) -> Result<LoadedMetadata, MetadataError> {
        let mut valid = Vec::new();
        for &sector in SpareDeviceLayout::copy_sectors() {
            match self.read_copy(sector).await {
                Ok(copy) => valid.push(copy),
                Err(e) => debug!("metadata copy at sector {sector} invalid: {e}"),
            }
        }

        if valid.is_empty() {
            return Err(MetadataError::NoValidMetadata);
        }

        valid.sort_by_key(|c| c.header.version_counter);
        let winner = valid.pop().expect("checked non-empty above");
        self.version_counter
            .store(winner.header.version_counter, Ordering::Release);

        let entries = body::decode(&winner.body)?;
        Ok(LoadedMetadata {
            valid_copies: valid.len() + 1,
            header: winner.header,
            entries,
        })
    }

    /// Rewrites every copy with the winning bytes, repairing stale or
    /// corrupt copies (spec.md §4.3 step 4, optional async repair).
    pub async fn repair_stale_copies(
        &self,
        entries: &[RemapEntrySnapshot],
        fingerprint: MainDeviceFingerprint,
        target_config: TargetConfig,
        cancelled: &CancellationToken,
    ) -> Result<u64, MetadataError> {
        // Re-persisting unconditionally is simpler than diffing per-copy
        // state and gives every copy the current version counter, which
        // is what repair is trying to achieve anyway.
        self.version_counter.fetch_sub(1, Ordering::AcqRel);
        self.persist(entries, fingerprint, target_config, cancelled)
            .await
    }
}
