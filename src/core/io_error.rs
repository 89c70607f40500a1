//! I/O failure classification (spec.md §4.1, §7).

use snafu::Snafu;

/// Classification of an I/O failure surfaced by a [`BackingDevice`](super::BackingDevice).
///
/// Only `Medium` ever reaches the error pipeline; `Transient` is expected to
/// be retried by the host framework, `Fatal` is always propagated, and
/// `Cancelled` is never treated as a user-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// Expected to clear up on retry (e.g. a queue-full condition).
    Transient,
    /// A medium/sector-level error: the classic "bad sector" signal that
    /// drives remap creation for WRITE-class requests.
    Medium,
    /// Unrecoverable device-level failure.
    Fatal,
    /// The request was cancelled as part of teardown; never surfaced as an
    /// error to the filesystem.
    Cancelled,
}

impl std::fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IoErrorKind::Transient => "transient",
            IoErrorKind::Medium => "medium",
            IoErrorKind::Fatal => "fatal",
            IoErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl std::error::Error for IoErrorKind {}

/// An I/O completion error, carrying the raw errno alongside its
/// classification so logs retain the underlying cause.
#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum IoError {
    #[snafu(display("transient I/O error (errno {errno}) on {device}"))]
    Transient { errno: i32, device: String },
    #[snafu(display("medium error (errno {errno}) on {device} at sector {sector}"))]
    Medium {
        errno: i32,
        device: String,
        sector: u64,
    },
    #[snafu(display("fatal I/O error (errno {errno}) on {device}"))]
    Fatal { errno: i32, device: String },
    #[snafu(display("I/O on {device} cancelled"))]
    Cancelled { device: String },
}

impl IoError {
    pub fn kind(&self) -> IoErrorKind {
        match self {
            IoError::Transient { .. } => IoErrorKind::Transient,
            IoError::Medium { .. } => IoErrorKind::Medium,
            IoError::Fatal { .. } => IoErrorKind::Fatal,
            IoError::Cancelled { .. } => IoErrorKind::Cancelled,
        }
    }

    pub fn is_medium(&self) -> bool {
        matches!(self.kind(), IoErrorKind::Medium)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), IoErrorKind::Cancelled)
    }
}
