//! Metadata body: the serialized list of remap entries (spec.md §3, §4.3).

use snafu::{ResultExt, Snafu};

use crate::remap::RemapEntrySnapshot;

use super::header::body_checksum;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum BodyError {
    #[snafu(display("failed to serialize metadata body: {source}"))]
    Encode { source: bincode::Error },
    #[snafu(display("failed to deserialize metadata body: {source}"))]
    Decode { source: bincode::Error },
}

/// Little-endian, endian-explicit encoding (bincode's fixed-integer
/// encoding is already little-endian on every supported target, and the
/// crate is never compiled for a big-endian host — the teacher's nexus
/// metadata code makes the identical assumption).
pub fn encode(entries: &[RemapEntrySnapshot]) -> Result<Vec<u8>, BodyError> {
    bincode::serialize(entries).context(Encode)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<RemapEntrySnapshot>, BodyError> {
    bincode::deserialize(bytes).context(Decode)
}

pub fn checksum(bytes: &[u8]) -> u32 {
    body_checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remap::RemapState;

    #[test]
    fn round_trips() {
        let entries = vec![RemapEntrySnapshot {
            main_sector: 50,
            spare_sector: 5000,
            length: 1,
            state: RemapState::Active,
            error_count: 0,
            access_time: 0,
        }];
        let bytes = encode(&entries).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(entries, decoded);
    }
}
