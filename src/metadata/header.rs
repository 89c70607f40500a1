//! On-spare metadata header (spec.md §3, §4.3, §6).
//!
//! Checksum discipline mirrors the teacher's legacy nexus metadata code
//! (`mayastor/src/bdev/nexus/nexus_metadata.rs`): a header CRC computed
//! with the checksum field itself zeroed, and a body CRC carried alongside
//! it. Both use `crc32::checksum_ieee` (polynomial 0xEDB88320, the CRC-32
//! used throughout that module), per spec.md §4.3/§6.

use bincode::Error as BincodeError;
use crc::crc32::{self, Hasher32};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::fingerprint::MainDeviceFingerprint;

pub const METADATA_MAGIC: u32 = 0xDEAD_BEEF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub sector_size: u32,
    pub flags: u32,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum HeaderError {
    #[snafu(display("incorrect metadata magic: {found:#x}"))]
    BadMagic { found: u32 },
    #[snafu(display("header checksum mismatch"))]
    HeaderChecksum,
    #[snafu(display("body checksum mismatch"))]
    BodyChecksum,
    #[snafu(display("failed to (de)serialize metadata header: {source}"))]
    Codec { source: BincodeError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub version_counter: u64,
    pub entry_count: u32,
    pub body_crc32: u32,
    pub header_crc32: u32,
    pub timestamp: u64,
    pub fingerprint: MainDeviceFingerprint,
    pub target_config: TargetConfig,
}

impl MetadataHeader {
    pub fn new(
        version_counter: u64,
        entry_count: u32,
        body_crc32: u32,
        timestamp: u64,
        fingerprint: MainDeviceFingerprint,
        target_config: TargetConfig,
    ) -> Self {
        let mut header = MetadataHeader {
            magic: METADATA_MAGIC,
            version_major: 1,
            version_minor: 0,
            version_counter,
            entry_count,
            body_crc32,
            header_crc32: 0,
            timestamp,
            fingerprint,
            target_config,
        };
        header.header_crc32 = header.compute_checksum();
        header
    }

    /// Checksums the header with `header_crc32` treated as zero, matching
    /// the teacher's "checksum the header with the checksum field itself
    /// set to 0" convention.
    fn compute_checksum(&self) -> u32 {
        let mut probe = *self;
        probe.header_crc32 = 0;
        let bytes = bincode::serialize(&probe).expect("fixed-size header always serializes");
        crc32::checksum_ieee(&bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        bincode::serialize(self).context(Codec)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        let header: MetadataHeader = bincode::deserialize(bytes).context(Codec)?;
        if header.magic != METADATA_MAGIC {
            return Err(HeaderError::BadMagic { found: header.magic });
        }
        if header.compute_checksum() != header.header_crc32 {
            return Err(HeaderError::HeaderChecksum);
        }
        Ok(header)
    }

    pub fn verify_body(&self, body_crc32: u32) -> Result<(), HeaderError> {
        if body_crc32 != self.body_crc32 {
            return Err(HeaderError::BodyChecksum);
        }
        Ok(())
    }

    /// Validates magic and header checksum in place, without a
    /// serialize/deserialize round trip.
    pub fn verify(&self) -> Result<(), HeaderError> {
        if self.magic != METADATA_MAGIC {
            return Err(HeaderError::BadMagic { found: self.magic });
        }
        if self.compute_checksum() != self.header_crc32 {
            return Err(HeaderError::HeaderChecksum);
        }
        Ok(())
    }
}

/// CRC-32 (IEEE, polynomial 0xEDB88320) over a serialized body.
pub fn body_checksum(bytes: &[u8]) -> u32 {
    let mut digest = crc32::Digest::new(crc32::IEEE);
    digest.write(bytes);
    digest.sum32()
}
