//! The backing I/O adapter (component A, spec.md §4.1).
//!
//! A narrow interface over two opaque block devices so the rest of the
//! engine is device-framework-agnostic, grounded on the teacher's
//! per-backend bdev modules (`io-engine/src/bdev/{aio,uring,malloc}.rs`):
//! each backend implements `open`/`close`/`submit`/`capacity` against its
//! own transport, and the rest of the crate only ever talks to the trait.

use async_trait::async_trait;
use snafu::Snafu;

use super::{io_error::IoError, sector::Sector};

#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum OpenError {
    #[snafu(display("device not found: {path}"))]
    NotFound { path: String },
    #[snafu(display("permission denied opening {path}"))]
    Permission { path: String },
    #[snafu(display("device busy: {path}"))]
    Busy { path: String },
}

/// An opened backing device. Implementations are responsible for releasing
/// the underlying resource in [`BackingDevice::close`]; `close` must be
/// infallible and safe to call on every exit path, including during
/// cancelled teardown.
#[async_trait]
pub trait BackingDevice: Send + Sync + std::fmt::Debug {
    /// Human-readable name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Device capacity in sectors.
    fn capacity(&self) -> Sector;

    fn logical_block_size(&self) -> u32;

    fn physical_block_size(&self) -> u32;

    /// Issue a read. Resolves once the read has completed (successfully or
    /// not); the engine's own executor is responsible for not blocking the
    /// fast path on this future (see `core` module docs).
    async fn read_at(&self, sector: Sector, len: u32, buf: &mut [u8]) -> Result<(), IoError>;

    async fn write_at(&self, sector: Sector, len: u32, buf: &[u8]) -> Result<(), IoError>;

    async fn write_zeroes_at(&self, sector: Sector, len: u32) -> Result<(), IoError>;

    async fn discard_at(&self, sector: Sector, len: u32) -> Result<(), IoError>;

    /// Release any resources held by this handle. Infallible: a device that
    /// is vanishing mid-close must not hang or panic the caller.
    async fn close(&self);
}
