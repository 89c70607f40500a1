//! Component D: the I/O path (spec.md §4.4).
//!
//! Per-request fast-path lookup and redirection, with an end-of-I/O hook
//! that wires into the error pipeline. Grounded on the teacher's
//! `FindChild`/`select_nexus_io_channel` routing logic in
//! `mayastor/src/bdev/nexus/nexus_io.rs` and `nexus_channel.rs`: one table
//! lookup decides which child a request goes to, and a completion callback
//! drives child retirement on error. Here the "children" are just two
//! fixed backends (main, spare) and "retirement" is replaced by remap
//! creation.

use std::sync::Arc;

use snafu::Snafu;

use crate::{
    core::{BackingDevice, IoResult, Request, Sector, SectorRange, Target},
    remap::{RemapIndex, RemapState},
};

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum RoutingError {
    #[snafu(display(
        "request [{start}, {end}) partially overlaps remap boundary at {boundary}; refusing to split"
    ))]
    PartialOverlap {
        start: Sector,
        end: Sector,
        boundary: Sector,
    },
}

/// The outcome of [`map`]: which backend a request was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Passthrough,
    Remapped { spare_sector: Sector },
}

/// Per-request fast-path lookup and redirection (spec.md §4.4 `map`).
///
/// Performs exactly one hash lookup (inside [`RemapIndex::find`]) plus one
/// pointer dereference; never allocates, never blocks. If the request
/// spans a remap boundary without being fully contained by it, the
/// request is refused rather than silently split: this crate documents
/// the "refuse" half of spec.md §4.4's split-or-refuse choice, relying on
/// the host framework to deliver pre-split requests at mapping boundaries
/// for the common case (spec.md §4.4 Range handling).
pub fn map(index: &RemapIndex, request: &mut Request) -> Result<Routing, RoutingError> {
    let request_range = SectorRange::new(request.original_sector, request.length);

    let Some(entry) = index.find(request.original_sector) else {
        return Ok(Routing::Passthrough);
    };

    if entry.state() != RemapState::Active {
        // PENDING: not yet write-ahead persisted, not observable to
        // routing. FAILED: poison, must not redirect to it again.
        return Ok(Routing::Passthrough);
    }

    let entry_range = entry.main_range();
    if request_range.partially_overlaps(&entry_range) {
        return Err(RoutingError::PartialOverlap {
            start: request_range.start,
            end: request_range.end(),
            boundary: entry_range.end(),
        });
    }

    let spare_sector = entry.translate(request.original_sector);
    request.route_to_spare(spare_sector);
    entry.touch(now_micros());
    Ok(Routing::Remapped { spare_sector })
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Dispatches a mapped request to the appropriate backing device,
/// returning the raw I/O result. The caller (the `Device`'s request
/// dispatcher) is responsible for feeding this result into the error
/// pipeline's `end_io` (spec.md §4.4 step 3/4, §4.5).
pub async fn submit(
    main: &Arc<dyn BackingDevice>,
    spare: &Arc<dyn BackingDevice>,
    request: &Request,
    buf: &mut [u8],
) -> IoResult {
    let backend: &Arc<dyn BackingDevice> = match request.target {
        Target::Main => main,
        Target::Spare => spare,
    };

    match request.op {
        crate::core::Op::Read | crate::core::Op::ReadAhead => {
            backend
                .read_at(request.routed_sector, request.length, buf)
                .await
        }
        crate::core::Op::Write => {
            backend
                .write_at(request.routed_sector, request.length, buf)
                .await
        }
        crate::core::Op::WriteZeroes => {
            backend
                .write_zeroes_at(request.routed_sector, request.length)
                .await
        }
        crate::core::Op::Discard => {
            backend
                .discard_at(request.routed_sector, request.length)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::Op, remap::RemapEntry};

    #[test]
    fn passthrough_when_no_remap() {
        let index = RemapIndex::new();
        let mut request = Request::new(Op::Read, 10, 1);
        let routing = map(&index, &mut request).unwrap();
        assert_eq!(routing, Routing::Passthrough);
        assert_eq!(request.target, Target::Main);
    }

    #[test]
    fn pending_remap_is_not_routed() {
        let index = RemapIndex::new();
        let entry = Arc::new(RemapEntry::new(10, 5_000, 1));
        index.insert(entry).unwrap();
        let mut request = Request::new(Op::Read, 10, 1);
        let routing = map(&index, &mut request).unwrap();
        assert_eq!(routing, Routing::Passthrough);
    }

    #[test]
    fn active_remap_redirects_to_spare() {
        let index = RemapIndex::new();
        let entry = Arc::new(RemapEntry::new(10, 5_000, 4));
        entry.set_state(RemapState::Active);
        index.insert(entry).unwrap();

        let mut request = Request::new(Op::Write, 12, 1);
        let routing = map(&index, &mut request).unwrap();
        assert_eq!(routing, Routing::Remapped { spare_sector: 5_002 });
        assert_eq!(request.target, Target::Spare);
        assert_eq!(request.routed_sector, 5_002);
    }

    #[test]
    fn partial_overlap_is_refused() {
        let index = RemapIndex::new();
        let entry = Arc::new(RemapEntry::new(10, 5_000, 4));
        entry.set_state(RemapState::Active);
        index.insert(entry).unwrap();

        let mut request = Request::new(Op::Write, 13, 4);
        let err = map(&index, &mut request).unwrap_err();
        assert_eq!(
            err,
            RoutingError::PartialOverlap {
                start: 13,
                end: 17,
                boundary: 14,
            }
        );
    }
}
