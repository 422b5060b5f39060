//! Bundle checksum
//!
//! Modified FNV-1 over the whole file, read in 16 KiB chunks, with the
//! checksum field (bytes 4..8) zeroed in the first chunk and an avalanche
//! finish. All arithmetic is signed 32-bit with wrapping and arithmetic right
//! shifts; the stored value must match bit for bit.
//!
//! These helpers work on a path and need no open bundle instance.

use super::header::CHECKSUM_RANGE;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

const CHUNK_SIZE: usize = 16 * 1024;
const FNV_OFFSET_BASIS: i32 = 2166136261u32 as i32;
const FNV_PRIME: i32 = 16777619;

/// Checksum of everything `reader` yields. Inputs shorter than 8 bytes hash to 0.
pub fn checksum_reader<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<i32> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut size = read_chunk(reader, &mut chunk)?;
    if size < 8 {
        return Ok(0);
    }
    chunk[CHECKSUM_RANGE].fill(0);

    let mut hash = FNV_OFFSET_BASIS;
    while size > 0 {
        for &byte in &chunk[..size] {
            hash = (hash ^ byte as i32).wrapping_mul(FNV_PRIME);
        }
        size = read_chunk(reader, &mut chunk)?;
    }

    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    Ok(hash)
}

/// Checksum of an in-memory bundle image
pub fn checksum_bytes(bytes: &[u8]) -> i32 {
    // Reading from a slice cannot fail
    checksum_reader(&mut &bytes[..]).unwrap_or(0)
}

/// Checksum of the bundle file as it is on disk
pub fn calc_bundle_checksum<P: AsRef<Path>>(bundle_path: P) -> Result<i32> {
    let mut file = File::open(bundle_path)?;
    Ok(checksum_reader(&mut file)?)
}

/// Checksum stored in the header, `None` for files shorter than 8 bytes
pub fn stored_checksum<P: AsRef<Path>>(bundle_path: P) -> Result<Option<i32>> {
    let mut file = File::open(bundle_path)?;
    if file.metadata()?.len() < 8 {
        return Ok(None);
    }
    let mut field = [0u8; 4];
    file.seek(SeekFrom::Start(CHECKSUM_RANGE.start as u64))?;
    file.read_exact(&mut field)?;
    Ok(Some(i32::from_le_bytes(field)))
}

/// True when the stored checksum differs from the recomputed one, or the
/// file is too short to carry one
pub fn is_bundle_corrupted<P: AsRef<Path>>(bundle_path: P) -> Result<bool> {
    let bundle_path = bundle_path.as_ref();
    match stored_checksum(bundle_path)? {
        None => Ok(true),
        Some(stored) => Ok(stored != calc_bundle_checksum(bundle_path)?),
    }
}

/// Recompute the checksum and patch it into the header in place
pub fn refresh_bundle_checksum<P: AsRef<Path>>(bundle_path: P) -> Result<()> {
    let bundle_path = bundle_path.as_ref();
    let checksum = calc_bundle_checksum(bundle_path)?;
    let mut file = OpenOptions::new().write(true).open(bundle_path)?;
    if file.metadata()?.len() > 8 {
        file.seek(SeekFrom::Start(CHECKSUM_RANGE.start as u64))?;
        file.write_all(&checksum.to_le_bytes())?;
        file.flush()?;
        debug!("Refreshed checksum of {:?}: {:#010x}", bundle_path, checksum);
    }
    Ok(())
}

/// Fill `buf` as far as the reader allows
fn read_chunk<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
