//! Crate-wide error aggregation.
//!
//! Each module owns its own `snafu`-derived error enum (the teacher's
//! per-module-error convention); this module stitches them into a single
//! `Result` alias for callers of the public API who don't care which
//! component failed.

use snafu::Snafu;

use crate::{
    core::IoErrorKind,
    device::DeviceError,
    error_pipeline::PipelineError,
    metadata::MetadataError,
    remap::IndexError,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{}", source))]
    Index { source: IndexError },
    #[snafu(display("{}", source))]
    Metadata { source: MetadataError },
    #[snafu(display("{}", source))]
    Device { source: DeviceError },
    #[snafu(display("{}", source))]
    Pipeline { source: PipelineError },
    #[snafu(display("I/O error: {}", source))]
    Io { source: IoErrorKind },
}

impl From<IndexError> for Error {
    fn from(source: IndexError) -> Self {
        Error::Index { source }
    }
}

impl From<MetadataError> for Error {
    fn from(source: MetadataError) -> Self {
        Error::Metadata { source }
    }
}

impl From<DeviceError> for Error {
    fn from(source: DeviceError) -> Self {
        Error::Device { source }
    }
}

impl From<PipelineError> for Error {
    fn from(source: PipelineError) -> Self {
        Error::Pipeline { source }
    }
}

impl From<IoErrorKind> for Error {
    fn from(source: IoErrorKind) -> Self {
        Error::Io { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
