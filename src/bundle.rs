//! The bundle contract
//!
//! Every bundle flavour (packed, unpacked directory, aggregate overlay)
//! implements [`AssetBundle`]. Queries take `&self` and may run from many
//! threads; mutating calls take `&mut self`, so callers serialize writers.

use crate::attributes::AssetAttributes;
use crate::context;
use crate::error::{BundleError, Result};
use crate::path;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Parameters for [`AssetBundle::import_file`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Extra bytes reserved after the payload for in-place growth
    pub reserve: u32,
    /// Extension of the asset's source file before cooking
    pub source_extension: String,
    /// Modification time to record; `None` records the import time
    pub time: Option<DateTime<Utc>>,
    pub attributes: AssetAttributes,
    /// Opaque hash of the cooking rules, at most 65535 bytes
    pub cooking_rules_sha1: Option<Vec<u8>>,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(mut self, bytes: u32) -> Self {
        self.reserve = bytes;
        self
    }

    pub fn source_extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.source_extension = extension.into();
        self
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn attributes(mut self, attributes: AssetAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn cooking_rules_sha1<B: Into<Vec<u8>>>(mut self, sha1: B) -> Self {
        self.cooking_rules_sha1 = Some(sha1.into());
        self
    }
}

/// Operations every bundle honors
pub trait AssetBundle: Send + Sync {
    /// Open an asset for reading, decompressing transparently.
    /// Fails with `NotFound` when the path is absent.
    fn open_file(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Read a whole asset into memory
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.open_file(path)?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    fn file_last_write_time(&self, path: &str) -> Result<DateTime<Utc>>;

    fn cooking_rules_sha1(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Stored size of the asset
    fn file_size(&self, path: &str) -> Result<u64>;

    fn delete_file(&mut self, path: &str) -> Result<()>;

    fn file_exists(&self, path: &str) -> bool;

    fn attributes(&self, _path: &str) -> Result<AssetAttributes> {
        Ok(AssetAttributes::NONE)
    }

    fn set_attributes(&mut self, path: &str, _attributes: AssetAttributes) -> Result<()> {
        Err(BundleError::Unsupported(format!(
            "cannot set attributes of '{}' on this bundle",
            path
        )))
    }

    /// Store `data` under `path`, replacing any existing asset
    fn import_file(
        &mut self,
        path: &str,
        data: &mut dyn Read,
        options: &ImportOptions,
    ) -> Result<()>;

    /// Import a file from disk, recording its last-write time
    fn import_file_from_path(
        &mut self,
        source: &Path,
        path: &str,
        options: &ImportOptions,
    ) -> Result<()> {
        let mut file = File::open(source)?;
        let modified: DateTime<Utc> = file.metadata()?.modified()?.into();
        let options = options.clone().time(modified);
        self.import_file(path, &mut file, &options)
    }

    /// Paths in the bundle, optionally restricted to a case-insensitive
    /// prefix. Each call starts a fresh enumeration.
    fn enumerate_files(&self, prefix: Option<&str>) -> Box<dyn Iterator<Item = String> + '_>;

    /// Flush pending changes and release resources. Repeat calls are no-ops.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// `name.<lang>.ext` if the active language has such a variant here,
    /// otherwise `path` unchanged
    fn localized_path(&self, path: &str) -> String {
        match context::current_language() {
            Some(language) if !language.is_empty() => {
                let localized = path::localized_variant(path, &language);
                if self.file_exists(&localized) {
                    localized
                } else {
                    path.to_string()
                }
            }
            _ => path.to_string(),
        }
    }

    fn open_file_localized(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.open_file(&self.localized_path(path))
    }
}
