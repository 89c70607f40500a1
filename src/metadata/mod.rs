//! Component C: the persistent metadata engine (spec.md §4.3).
//!
//! Persists the remap index and device configuration redundantly across
//! five fixed-sector copies on the spare device (see [`layout`]), encodes
//! them with CRC-guarded headers ([`header`]) and bodies ([`body`]), and
//! exposes a background [`sync`] worker that coalesces dirty state into at
//! most one in-flight persist at a time (spec.md §4.3 "Sync scheduling").

mod body;
mod engine;
mod fingerprint;
mod header;
mod layout;
mod sync;

pub use body::BodyError;
pub use engine::{LoadedMetadata, MetadataEngine, MetadataError};
pub use fingerprint::MainDeviceFingerprint;
pub use header::{HeaderError, MetadataHeader, TargetConfig, METADATA_MAGIC};
pub use layout::{SpareDeviceLayout, COPY_SLOT_SECTORS};
pub use sync::SyncWorker;
