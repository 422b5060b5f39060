//! Index table: descriptors and their on-disk records
//!
//! ```text
//! i32 count
//! count × {
//!     string  name
//!     i64     modification time (binary date)
//!     u16     sha1 length, then that many bytes
//!     i32     offset
//!     i32     length
//!     i32     allocated size
//!     i32     attributes
//!     string  source extension
//! }
//! ```
//!
//! Strings carry a 7-bit variable-length byte count followed by UTF-8.

use crate::attributes::AssetAttributes;
use crate::error::{BundleError, Result};
use crate::path;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Read;

/// Index record describing one stored asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetDescriptor {
    pub modification_time: DateTime<Utc>,
    pub cooking_rules_sha1: Option<Vec<u8>>,
    /// Absolute byte offset of the payload inside the bundle file
    pub offset: u32,
    /// Stored payload length (compressed length for zipped assets)
    pub length: u32,
    /// Reserved span, always >= `length`
    pub allocated_size: u32,
    pub attributes: AssetAttributes,
    pub source_extension: String,
}

impl AssetDescriptor {
    /// One past the last reserved byte
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.allocated_size as u64
    }
}

/// Index entry: the path as it was imported plus its descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub descriptor: AssetDescriptor,
}

/// Case-insensitive index keyed by `path::index_key`
pub type Index = BTreeMap<String, IndexEntry>;

// 100 ns ticks since 0001-01-01T00:00:00 at the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_MASK: i64 = 0x3FFF_FFFF_FFFF_FFFF;
const TICKS_CEILING: i64 = 0x4000_0000_0000_0000;
const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;
const KIND_UTC: i64 = 0x4000_0000_0000_0000;
const KIND_LOCAL_BIT: u64 = 0x8000_0000_0000_0000;

/// Encode a timestamp as a UTC binary date
pub fn time_to_binary(time: &DateTime<Utc>) -> i64 {
    let ticks = UNIX_EPOCH_TICKS
        + time.timestamp() * TICKS_PER_SECOND
        + (time.timestamp_subsec_nanos() / 100) as i64;
    (ticks & TICKS_MASK) | KIND_UTC
}

/// Decode a binary date. Local-kind values already hold UTC ticks;
/// unspecified-kind values are taken as UTC.
pub fn time_from_binary(value: i64) -> Option<DateTime<Utc>> {
    let mut ticks = value & TICKS_MASK;
    if (value as u64) & KIND_LOCAL_BIT != 0 && ticks > TICKS_CEILING - TICKS_PER_DAY {
        ticks -= TICKS_CEILING;
    }
    let since_epoch = ticks - UNIX_EPOCH_TICKS;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Drop sub-tick precision so a timestamp survives a disk round trip unchanged
pub fn truncate_to_ticks(time: DateTime<Utc>) -> DateTime<Utc> {
    time_from_binary(time_to_binary(&time)).unwrap_or(time)
}

fn write_7bit_len(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub(crate) fn write_string(out: &mut Vec<u8>, value: &str) {
    write_7bit_len(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn to_disk_i32(value: u32, what: &str, name: &str) -> Result<[u8; 4]> {
    i32::try_from(value)
        .map(|v| v.to_le_bytes())
        .map_err(|_| BundleError::InvalidState(format!("{} of '{}' exceeds i32 range", what, name)))
}

/// Serialize the index table (count + records)
pub fn encode_index(index: &Index) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + index.len() * 64);
    out.extend_from_slice(&(index.len() as i32).to_le_bytes());
    for entry in index.values() {
        let d = &entry.descriptor;
        write_string(&mut out, &entry.name);
        out.extend_from_slice(&time_to_binary(&d.modification_time).to_le_bytes());

        let sha1 = d.cooking_rules_sha1.as_deref().unwrap_or(&[]);
        let sha1_len = u16::try_from(sha1.len()).map_err(|_| {
            BundleError::InvalidState(format!(
                "Invalid cooking rules hash for '{}': {} bytes (max {})",
                entry.name,
                sha1.len(),
                u16::MAX
            ))
        })?;
        out.extend_from_slice(&sha1_len.to_le_bytes());
        out.extend_from_slice(sha1);

        out.extend_from_slice(&to_disk_i32(d.offset, "offset", &entry.name)?);
        out.extend_from_slice(&to_disk_i32(d.length, "length", &entry.name)?);
        out.extend_from_slice(&to_disk_i32(d.allocated_size, "allocated size", &entry.name)?);
        out.extend_from_slice(&d.attributes.to_i32().to_le_bytes());
        write_string(&mut out, &d.source_extension);
    }
    Ok(out)
}

/// Reader over index bytes that reports truncation as corruption
pub(crate) struct IndexReader<'a, R: Read> {
    inner: R,
    bundle_path: &'a str,
}

impl<'a, R: Read> IndexReader<'a, R> {
    pub(crate) fn new(inner: R, bundle_path: &'a str) -> Self {
        IndexReader { inner, bundle_path }
    }

    fn corrupted(&self, reason: impl Into<String>) -> BundleError {
        BundleError::corrupted(self.bundle_path, reason)
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| self.corrupted(format!("truncated index: {}", e)))?;
        Ok(buf)
    }

    fn vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(self.corrupted("truncated index"));
        }
        Ok(buf)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes()?))
    }

    fn u32_field(&mut self, what: &str) -> Result<u32> {
        let value = self.i32()?;
        u32::try_from(value).map_err(|_| self.corrupted(format!("negative {} {}", what, value)))
    }

    fn string(&mut self) -> Result<String> {
        let mut len: u32 = 0;
        let mut shift = 0;
        loop {
            if shift > 28 {
                return Err(self.corrupted("bad string length prefix"));
            }
            let [byte] = self.bytes::<1>()?;
            len |= ((byte & 0x7F) as u32) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        let bytes = self.vec(len as usize)?;
        String::from_utf8(bytes).map_err(|_| self.corrupted("index string is not UTF-8"))
    }

    /// Parse `count` + records into a fresh index
    pub(crate) fn read_index(&mut self) -> Result<Index> {
        let count = self.i32()?;
        if count < 0 {
            return Err(self.corrupted(format!("negative descriptor count {}", count)));
        }
        let mut index = Index::new();
        for _ in 0..count {
            let name = self.string()?;
            let raw_time = self.i64()?;
            let modification_time = time_from_binary(raw_time)
                .ok_or_else(|| self.corrupted(format!("bad timestamp for '{}'", name)))?;
            let sha1_len = self.u16()?;
            let cooking_rules_sha1 = if sha1_len != 0 {
                Some(self.vec(sha1_len as usize)?)
            } else {
                None
            };
            let offset = self.u32_field("offset")?;
            let length = self.u32_field("length")?;
            let allocated_size = self.u32_field("allocated size")?;
            let attributes = AssetAttributes::from_i32(self.i32()?);
            let source_extension = self.string()?;

            let descriptor = AssetDescriptor {
                modification_time,
                cooking_rules_sha1,
                offset,
                length,
                allocated_size,
                attributes,
                source_extension,
            };
            if index
                .insert(path::index_key(&name), IndexEntry { name: name.clone(), descriptor })
                .is_some()
            {
                return Err(self.corrupted(format!("duplicate index entry '{}'", name)));
            }
        }
        Ok(index)
    }
}
