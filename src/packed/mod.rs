//! Packed bundle engine
//!
//! A packed bundle is a single file:
//!
//! ```text
//! [16-byte header][asset payloads, each followed by reserve][index table]
//! ```
//!
//! The index lives at `index_offset`, just past the last allocated span.
//! Imports append at `index_offset` (overwriting the stale index) or reuse an
//! existing span in place. Deleted spans go to a trash list and are reclaimed
//! by compaction, which shifts the remaining payloads towards the header.
//! The index and checksum are only rewritten on close.

pub mod checksum;
pub mod header;
pub mod index;
pub mod pool;
pub mod stream;

pub use checksum::{
    calc_bundle_checksum, checksum_bytes, is_bundle_corrupted, refresh_bundle_checksum,
    stored_checksum,
};
pub use header::{Header, HEADER_SIZE, SIGNATURE};
pub use index::{AssetDescriptor, IndexEntry};
pub use pool::BundleSource;
pub use stream::AssetStream;

use crate::attributes::AssetAttributes;
use crate::bundle::{AssetBundle, ImportOptions};
use crate::compression::{self, CompressionMethod};
use crate::config::BundleConfig;
use crate::error::{BundleError, Result};
use crate::path;
use chrono::{DateTime, Utc};
use index::{Index, IndexReader};
use pool::StreamPool;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a packed bundle file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Queries only; mutating calls fail with `Unsupported`
    ReadOnly,
    /// Queries and mutations. A missing file is created as an empty bundle.
    Writable,
}

type ModifyingHook = Box<dyn FnMut() + Send + Sync>;

/// Single-file asset container
pub struct PackedBundle {
    name: String,
    path: Option<PathBuf>,
    pool: Arc<StreamPool>,
    writer: Option<File>,
    index: Index,
    trash: Vec<AssetDescriptor>,
    index_offset: u32,
    modified: bool,
    closed: bool,
    config: BundleConfig,
    on_modifying: Option<ModifyingHook>,
}

impl PackedBundle {
    /// Open a bundle file with the default configuration
    ///
    /// The default configuration does not recompute the checksum, so a
    /// damaged payload opens normally. Call [`is_bundle_corrupted`] first, or
    /// enable [`BundleConfig::verify_checksum_on_open`], to have a mismatch
    /// reported as [`BundleError::Corrupted`].
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open_with_config(path, mode, BundleConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        config: BundleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        let pool = StreamPool::new(BundleSource::File(path.clone()), config.max_idle_handles);

        let (writer, index, index_offset) = match mode {
            OpenMode::Writable => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&path)?;
                let (index, index_offset) = load_index(&mut file, &name, &config)?;
                (Some(file), index, index_offset)
            }
            OpenMode::ReadOnly => {
                let mut handle = pool.acquire()?;
                let (index, index_offset) = load_index(handle.get_mut(), &name, &config)?;
                (None, index, index_offset)
            }
        };

        tracing::info!(
            "Opened bundle {} ({:?}, {} assets, index at {})",
            name,
            mode,
            index.len(),
            index_offset
        );

        Ok(PackedBundle {
            name,
            path: Some(path),
            pool,
            writer,
            index,
            trash: Vec::new(),
            index_offset,
            modified: false,
            closed: false,
            config,
            on_modifying: None,
        })
    }

    /// Read-only bundle over an image compiled into the binary
    pub fn open_embedded(name: &str, bytes: &'static [u8]) -> Result<Self> {
        Self::open_embedded_with_config(name, bytes, BundleConfig::default())
    }

    pub fn open_embedded_with_config(
        name: &str,
        bytes: &'static [u8],
        config: BundleConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pool = StreamPool::new(
            BundleSource::Embedded {
                name: name.to_string(),
                bytes,
            },
            config.max_idle_handles,
        );
        let mut handle = pool.acquire()?;
        let (index, index_offset) = load_index(handle.get_mut(), name, &config)?;
        handle.release();

        tracing::info!("Opened embedded bundle {} ({} assets)", name, index.len());

        Ok(PackedBundle {
            name: name.to_string(),
            path: None,
            pool,
            writer: None,
            index,
            trash: Vec::new(),
            index_offset,
            modified: false,
            closed: false,
            config,
            on_modifying: None,
        })
    }

    /// Register a callback fired before every mutating call
    pub fn on_modifying<F>(&mut self, hook: F)
    where
        F: FnMut() + Send + Sync + 'static,
    {
        self.on_modifying = Some(Box::new(hook));
    }

    /// File path, or the embedded image name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_offset(&self) -> u32 {
        self.index_offset
    }

    /// True once a mutation is pending for the next close
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Number of assets in the index
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Deleted spans waiting for compaction
    pub fn pending_reclaim(&self) -> usize {
        self.trash.len()
    }

    pub fn descriptor(&self, path: &str) -> Result<&AssetDescriptor> {
        self.entry(path).map(|entry| &entry.descriptor)
    }

    /// Seekable view over the stored (still compressed) payload
    pub fn open_raw(&self, path: &str) -> Result<AssetStream> {
        AssetStream::open(&self.pool, self.descriptor(path)?)
    }

    fn entry(&self, path: &str) -> Result<&IndexEntry> {
        self.index
            .get(&path::index_key(path))
            .ok_or_else(|| BundleError::NotFound(path.to_string()))
    }

    fn begin_mutation(&mut self) -> Result<()> {
        if self.closed || self.writer.is_none() {
            return Err(BundleError::Unsupported(format!(
                "bundle {} is not open for writing",
                self.name
            )));
        }
        if let Some(hook) = self.on_modifying.as_mut() {
            hook();
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut File> {
        self.writer.as_mut().ok_or_else(|| {
            BundleError::Unsupported(format!("bundle {} is not open for writing", self.name))
        })
    }

    fn remove_entry(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.index.remove(key)?;
        self.trash.push(entry.descriptor.clone());
        self.modified = true;
        Some(entry)
    }

    /// Reclaim the spans of deleted assets by shifting later payloads down.
    ///
    /// Trash spans are processed in offset order. The gap between the end of
    /// trash span `i` and the start of span `i + 1` (or the index offset) is
    /// moved back by the total size of spans `0..=i`, and every live
    /// descriptor inside that gap is shifted by the same amount.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.trash.is_empty() {
            return Ok(());
        }
        let block_copy_size = self.config.block_copy_size;
        let mut trash = std::mem::take(&mut self.trash);
        // Zero-sized spans first when offsets tie, so gaps never run backwards
        trash.sort_by_key(|d| (d.offset, d.allocated_size));

        let mut delta: u64 = 0;
        let mut shifts = Vec::with_capacity(trash.len());
        {
            let index_offset = self.index_offset as u64;
            let writer = self.writer()?;
            for (i, span) in trash.iter().enumerate() {
                delta += span.allocated_size as u64;
                let block_begin = span.end();
                let block_end = trash
                    .get(i + 1)
                    .map(|next| next.offset as u64)
                    .unwrap_or(index_offset);
                let size = block_end.checked_sub(block_begin).ok_or_else(|| {
                    BundleError::InvalidState(format!(
                        "overlapping deleted spans at offset {}",
                        span.offset
                    ))
                })?;
                move_block(writer, block_begin, size, -(delta as i64), block_copy_size)?;
                shifts.push((span.end(), delta));
            }
        }

        // A payload at `offset` moved back by the total size of the deleted
        // spans that end at or before it
        let keys: Vec<String> = self.index.keys().cloned().collect();
        for key in &keys {
            if let Some(entry) = self.index.get_mut(key) {
                let offset = entry.descriptor.offset as u64;
                let passed = shifts.partition_point(|(end, _)| *end <= offset);
                if passed > 0 {
                    entry.descriptor.offset = (offset - shifts[passed - 1].1) as u32;
                }
            }
        }

        self.index_offset -= delta as u32;
        let new_len = self.index_offset as u64;
        self.writer()?.set_len(new_len)?;

        tracing::info!(
            "Compacted bundle {}: reclaimed {} bytes from {} deleted assets",
            self.name,
            delta,
            trash.len()
        );
        Ok(())
    }

    /// Write the header (checksum zeroed) and the index at `index_offset`
    fn write_index_table(&mut self) -> Result<()> {
        let encoded = index::encode_index(&self.index)?;
        let header = Header::new(self.config.format_version, self.index_offset);
        let index_offset = self.index_offset as u64;

        let writer = self.writer()?;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.to_bytes())?;
        writer.seek(SeekFrom::Start(index_offset))?;
        writer.write_all(&encoded)?;
        writer.set_len(index_offset + encoded.len() as u64)?;
        writer.flush()?;
        Ok(())
    }

    fn flush_changes(&mut self) -> Result<()> {
        if self.writer.is_none() || !self.modified {
            return Ok(());
        }
        self.cleanup()?;
        self.write_index_table()?;
        if let Some(path) = &self.path {
            refresh_bundle_checksum(path)?;
        }
        self.modified = false;
        Ok(())
    }
}

impl AssetBundle for PackedBundle {
    fn open_file(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let descriptor = self.descriptor(path)?;
        let stream = AssetStream::open(&self.pool, descriptor)?;
        compression::decoder(stream, descriptor.attributes)
    }

    fn file_last_write_time(&self, path: &str) -> Result<DateTime<Utc>> {
        Ok(self.descriptor(path)?.modification_time)
    }

    fn cooking_rules_sha1(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.descriptor(path)?.cooking_rules_sha1.clone())
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        Ok(self.descriptor(path)?.length as u64)
    }

    fn delete_file(&mut self, path: &str) -> Result<()> {
        self.begin_mutation()?;
        let key = path::index_key(path);
        let entry = self
            .remove_entry(&key)
            .ok_or_else(|| BundleError::NotFound(path.to_string()))?;
        tracing::debug!(
            "Deleted {} from {} ({} bytes pending reclaim)",
            entry.name,
            self.name,
            entry.descriptor.allocated_size
        );
        Ok(())
    }

    fn file_exists(&self, path: &str) -> bool {
        self.index.contains_key(&path::index_key(path))
    }

    fn attributes(&self, path: &str) -> Result<AssetAttributes> {
        Ok(self.descriptor(path)?.attributes)
    }

    /// Persist new attribute bits. The compression bits describe how the
    /// stored payload is encoded, so changing them requires a re-import.
    fn set_attributes(&mut self, path: &str, attributes: AssetAttributes) -> Result<()> {
        self.begin_mutation()?;
        let entry = self
            .index
            .get_mut(&path::index_key(path))
            .ok_or_else(|| BundleError::NotFound(path.to_string()))?;
        let current = entry.descriptor.attributes;
        if (current ^ attributes).intersects(AssetAttributes::ZIPPED) {
            return Err(BundleError::InvalidState(format!(
                "changing the compression of '{}' requires re-importing it",
                entry.name
            )));
        }
        entry.descriptor.attributes = attributes;
        self.modified = true;
        Ok(())
    }

    fn import_file(
        &mut self,
        path: &str,
        data: &mut dyn Read,
        options: &ImportOptions,
    ) -> Result<()> {
        self.begin_mutation()?;
        let method = CompressionMethod::from_attributes(options.attributes);
        let payload = compression::compress(data, method, self.config.deflate_level)?;
        let length = u32::try_from(payload.len()).map_err(|_| {
            BundleError::InvalidState(format!(
                "'{}' is too large to store ({} bytes)",
                path,
                payload.len()
            ))
        })?;
        let time = index::truncate_to_ticks(options.time.unwrap_or_else(Utc::now));
        let key = path::index_key(path);
        let reserve = options.reserve as u64;

        let reusable = self.index.get(&key).and_then(|entry| {
            let allocated = entry.descriptor.allocated_size as u64;
            let fits = allocated >= length as u64 && allocated <= length as u64 + reserve;
            fits.then_some(entry.descriptor.offset)
        });

        match reusable {
            Some(offset) => {
                let entry = self
                    .index
                    .get_mut(&key)
                    .ok_or_else(|| BundleError::NotFound(path.to_string()))?;
                let d = &mut entry.descriptor;
                d.length = length;
                d.modification_time = time;
                d.attributes = options.attributes;
                d.cooking_rules_sha1 = options.cooking_rules_sha1.clone();
                d.source_extension = options.source_extension.clone();
                let slack = (d.allocated_size - length) as usize;

                let writer = self.writer()?;
                writer.seek(SeekFrom::Start(offset as u64))?;
                writer.write_all(&payload)?;
                writer.write_all(&vec![0u8; slack])?;
                writer.flush()?;
                tracing::debug!(
                    "Rewrote {} in place at {} ({} bytes, {} slack)",
                    path,
                    offset,
                    length,
                    slack
                );
            }
            None => {
                let allocated_size = length as u64 + reserve;
                let offset = self.index_offset;
                let end = offset as u64 + allocated_size;
                if end > i32::MAX as u64 {
                    return Err(BundleError::InvalidState(format!(
                        "importing '{}' would grow the bundle past {} bytes",
                        path,
                        i32::MAX
                    )));
                }
                self.remove_entry(&key);

                let writer = self.writer()?;
                writer.seek(SeekFrom::Start(offset as u64))?;
                writer.write_all(&payload)?;
                writer.write_all(&vec![0u8; options.reserve as usize])?;
                writer.flush()?;

                self.index.insert(
                    key,
                    IndexEntry {
                        name: path::correct_slashes(path),
                        descriptor: AssetDescriptor {
                            modification_time: time,
                            cooking_rules_sha1: options.cooking_rules_sha1.clone(),
                            offset,
                            length,
                            allocated_size: allocated_size as u32,
                            attributes: options.attributes,
                            source_extension: options.source_extension.clone(),
                        },
                    },
                );
                self.index_offset = end as u32;
                tracing::debug!(
                    "Appended {} at {} ({} bytes + {} reserve)",
                    path,
                    offset,
                    length,
                    options.reserve
                );
            }
        }
        self.modified = true;
        Ok(())
    }

    fn enumerate_files(&self, prefix: Option<&str>) -> Box<dyn Iterator<Item = String> + '_> {
        let prefix = prefix.map(path::index_key);
        Box::new(
            self.index
                .iter()
                .filter(move |(key, _)| prefix.as_deref().map_or(true, |p| key.starts_with(p)))
                .map(|(_, entry)| entry.name.clone()),
        )
    }

    /// Compact, write the index and refresh the checksum if anything changed,
    /// then release all handles
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.flush_changes();
        self.closed = true;
        self.writer = None;
        self.pool.close();
        self.index.clear();
        self.trash.clear();
        tracing::info!("Closed bundle {}", self.name);
        result
    }
}

impl Drop for PackedBundle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close bundle {}: {}", self.name, e);
        }
    }
}

/// Read the header and index table. An empty source is a fresh bundle.
fn load_index<R>(reader: &mut R, name: &str, config: &BundleConfig) -> Result<(Index, u32)>
where
    R: Read + Seek + ?Sized,
{
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len == 0 {
        return Ok((Index::new(), HEADER_SIZE as u32));
    }
    if file_len < HEADER_SIZE as u64 {
        return Err(BundleError::corrupted(
            name,
            format!("file is {} bytes, shorter than the header", file_len),
        ));
    }

    let mut bytes = [0u8; HEADER_SIZE];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut bytes)?;
    let header = Header::from_bytes(&bytes);
    let index_offset = header.validate(name, config.format_version, file_len)?;

    if config.verify_checksum_on_open {
        reader.seek(SeekFrom::Start(0))?;
        let actual = checksum::checksum_reader(&mut *reader)?;
        if actual != header.checksum {
            return Err(BundleError::corrupted(
                name,
                format!(
                    "checksum mismatch (stored {:#010x}, computed {:#010x})",
                    header.checksum, actual
                ),
            ));
        }
    }

    reader.seek(SeekFrom::Start(index_offset as u64))?;
    let index = IndexReader::new(BufReader::new(&mut *reader), name).read_index()?;
    validate_layout(&index, index_offset, name)?;
    Ok((index, index_offset))
}

/// Every span must sit between the header and the index without overlapping
fn validate_layout(index: &Index, index_offset: u32, name: &str) -> Result<()> {
    let mut spans: Vec<(u64, u64, &str)> = Vec::with_capacity(index.len());
    for entry in index.values() {
        let d = &entry.descriptor;
        if (d.offset as usize) < HEADER_SIZE
            || d.length > d.allocated_size
            || d.end() > index_offset as u64
        {
            return Err(BundleError::corrupted(
                name,
                format!(
                    "'{}' spans {}..{} (length {}) outside the data region",
                    entry.name,
                    d.offset,
                    d.end(),
                    d.length
                ),
            ));
        }
        spans.push((d.offset as u64, d.end(), entry.name.as_str()));
    }
    spans.sort_unstable();
    for pair in spans.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(BundleError::corrupted(
                name,
                format!("'{}' overlaps '{}'", pair[0].2, pair[1].2),
            ));
        }
    }
    Ok(())
}

/// Move `size` bytes at `offset` by `delta` bytes, chunk by chunk from the
/// front. Only backward moves are valid; the copy would clobber itself
/// going forward.
pub(crate) fn move_block<F>(
    file: &mut F,
    offset: u64,
    size: u64,
    delta: i64,
    block_size: usize,
) -> Result<()>
where
    F: Read + Write + Seek + ?Sized,
{
    if delta > 0 {
        return Err(BundleError::InvalidState(
            "block can only be moved towards the start of the file".to_string(),
        ));
    }
    if delta == 0 || size == 0 {
        return Ok(());
    }
    let shift = delta.unsigned_abs();
    if shift > offset {
        return Err(BundleError::InvalidState(format!(
            "cannot move block at {} back by {} bytes",
            offset, shift
        )));
    }

    let mut buffer = vec![0u8; block_size.max(1)];
    let mut done = 0u64;
    while done < size {
        let count = (size - done).min(buffer.len() as u64) as usize;
        let chunk = &mut buffer[..count];
        file.seek(SeekFrom::Start(offset + done))?;
        file.read_exact(chunk)?;
        file.seek(SeekFrom::Start(offset + done - shift))?;
        file.write_all(chunk)?;
        done += count as u64;
    }
    Ok(())
}
