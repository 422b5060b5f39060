use super::index::AssetDescriptor;
use super::pool::{PooledHandle, StreamPool};
use crate::error::{BundleError, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

/// Seekable read-only view over one asset's byte range
///
/// Positions are logical (`0..=len()`); every seek re-positions the
/// underlying handle at `descriptor.offset + position`. Reads are clamped to
/// the range and return 0 at its end. Mutation goes through the bundle, never
/// through the stream: `write`, `flush` and `set_len` always fail.
pub struct AssetStream {
    handle: Option<PooledHandle>,
    offset: u64,
    length: u64,
    position: u64,
}

impl AssetStream {
    pub(crate) fn open(pool: &Arc<StreamPool>, descriptor: &AssetDescriptor) -> Result<Self> {
        let mut stream = AssetStream {
            handle: Some(pool.acquire()?),
            offset: descriptor.offset as u64,
            length: descriptor.length as u64,
            position: 0,
        };
        stream.seek(SeekFrom::Start(0))?;
        Ok(stream)
    }

    /// Length of the stored payload
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Always fails
    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(BundleError::Unsupported(
            "asset streams are read-only".to_string(),
        ))
    }

    /// Give the pooled handle back. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    fn handle(&mut self) -> io::Result<&mut PooledHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "asset stream is closed"))
    }
}

impl Read for AssetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        let count = (buf.len() as u64).min(remaining) as usize;
        if count == 0 {
            return Ok(0);
        }
        let read = self.handle()?.get_mut().read(&mut buf[..count])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for AssetStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let length = self.length as i128;
        let target = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => length + delta as i128,
        };
        self.position = target.clamp(0, length) as u64;
        let absolute = self.offset + self.position;
        self.handle()?.get_mut().seek(SeekFrom::Start(absolute))?;
        Ok(self.position)
    }
}

impl Write for AssetStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "asset streams are read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "asset streams are read-only",
        ))
    }
}
