use crate::error::{BundleError, Result};

/// Bundle signature (first little-endian i32 of the file)
pub const SIGNATURE: i32 = 0x13AF;

/// Four i32 fields; the payload region starts right after
pub const HEADER_SIZE: usize = 4 * std::mem::size_of::<i32>();

/// Byte range of the checksum field
pub const CHECKSUM_RANGE: std::ops::Range<usize> = 4..8;

/// Packed bundle header
///
/// ```text
/// 0..4    signature       0x13AF
/// 4..8    checksum        see `checksum`
/// 8..12   format version
/// 12..16  index offset    start of the serialized index
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: i32,
    pub checksum: i32,
    pub format_version: i32,
    pub index_offset: i32,
}

impl Header {
    pub fn new(format_version: i32, index_offset: u32) -> Self {
        Header {
            signature: SIGNATURE,
            checksum: 0,
            format_version,
            index_offset: index_offset as i32,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.signature.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.index_offset.to_le_bytes());
        bytes
    }

    /// Parse without validation
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let field = |at: usize| {
            i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Header {
            signature: field(0),
            checksum: field(4),
            format_version: field(8),
            index_offset: field(12),
        }
    }

    /// Check signature, version and index offset against the file length.
    ///
    /// A bad signature is corruption; a version difference is reported
    /// separately because it calls for a rebuild rather than a repair.
    pub fn validate(&self, bundle_path: &str, expected_version: i32, file_len: u64) -> Result<u32> {
        if self.signature != SIGNATURE {
            return Err(BundleError::corrupted(
                bundle_path,
                format!("bad signature {:#x}", self.signature),
            ));
        }
        if self.format_version != expected_version {
            return Err(BundleError::VersionMismatch {
                found: self.format_version,
                expected: expected_version,
            });
        }
        if self.index_offset < HEADER_SIZE as i32 || self.index_offset as u64 > file_len {
            return Err(BundleError::corrupted(
                bundle_path,
                format!(
                    "index offset {} outside of file (length {})",
                    self.index_offset, file_len
                ),
            ));
        }
        Ok(self.index_offset as u32)
    }
}
