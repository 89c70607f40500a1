//! Block-device remapping engine.
//!
//! Sits in front of a failing "main" backing device and a healthy "spare"
//! backing device, transparently redirecting I/O for sectors that have
//! failed (or are predicted to fail) to relocated copies on the spare.
//!
//! The crate is organized the way the data actually flows: [`core`] is the
//! narrow I/O adapter over opaque block devices, [`remap`] is the in-memory
//! sector remap table, [`metadata`] persists that table redundantly on the
//! spare, [`io_path`] and [`error_pipeline`] are the per-request fast path
//! and the error-to-remap pipeline, and [`device`] ties all of it into a
//! constructible/destructible unit with background workers.

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde;
extern crate snafu;

pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod error_pipeline;
pub mod health;
pub mod io_path;
pub mod logging;
pub mod metadata;
pub mod remap;

pub use config::RemapEngineConfig;
pub use core::{BackingDevice, IoError, IoErrorKind, Op, Request, Sector};
pub use device::{Device, DeviceError};
pub use error::Error;
pub use remap::{RemapEntry, RemapIndex, RemapState};
