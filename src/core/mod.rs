//! Component A: the backing I/O adapter.
//!
//! Provides a narrow interface over two opaque block devices (main, spare)
//! so the rest of the engine does not depend on any particular device
//! framework (spec.md §4.1). This is the leaf dependency of the whole
//! pipeline — everything else in the crate is built on top of
//! [`BackingDevice`].

mod backing_device;
mod file_backend;
mod io_error;
mod mem_backend;
mod sector;

pub use backing_device::{BackingDevice, OpenError};
pub use file_backend::{kernel_support, FileBackend};
pub use io_error::{IoError, IoErrorKind};
pub use mem_backend::{FaultKind, InjectedFault, MemBackend};
pub use request::{IoResult, Op, Request, Target};
pub use sector::{Sector, SectorRange};

mod request;
