//! Read-only bundle over a plain directory tree
//!
//! Lets tools and development builds read loose files through the same
//! contract as a packed bundle. Cooking metadata does not exist for loose
//! files, and nothing here writes to disk.

use crate::bundle::{AssetBundle, ImportOptions};
use crate::error::{BundleError, Result};
use crate::path;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub struct UnpackedBundle {
    root: PathBuf,
}

impl UnpackedBundle {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BundleError::NotFound(root.display().to_string()));
        }
        tracing::info!("Opened unpacked bundle {}", root.display());
        Ok(UnpackedBundle { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a bundle path onto the directory, refusing anything that would
    /// escape it
    fn resolve(&self, asset: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(path::correct_slashes(asset));
        let inside = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !inside {
            return Err(BundleError::NotFound(asset.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn metadata(&self, asset: &str) -> Result<fs::Metadata> {
        let full = self.resolve(asset)?;
        match fs::metadata(&full) {
            Ok(metadata) if metadata.is_file() => Ok(metadata),
            Ok(_) => Err(BundleError::NotFound(asset.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BundleError::NotFound(asset.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_only(&self, operation: &str) -> BundleError {
        BundleError::Unsupported(format!(
            "{} on unpacked bundle {}",
            operation,
            self.root.display()
        ))
    }
}

impl AssetBundle for UnpackedBundle {
    fn open_file(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.metadata(path)?;
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }

    fn file_last_write_time(&self, path: &str) -> Result<DateTime<Utc>> {
        Ok(self.metadata(path)?.modified()?.into())
    }

    fn cooking_rules_sha1(&self, _path: &str) -> Result<Option<Vec<u8>>> {
        Err(self.read_only("cooking rules lookup"))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        Ok(self.metadata(path)?.len())
    }

    fn delete_file(&mut self, _path: &str) -> Result<()> {
        Err(self.read_only("delete"))
    }

    fn file_exists(&self, path: &str) -> bool {
        self.metadata(path).is_ok()
    }

    fn import_file(
        &mut self,
        _path: &str,
        _data: &mut dyn Read,
        _options: &ImportOptions,
    ) -> Result<()> {
        Err(self.read_only("import"))
    }

    fn enumerate_files(&self, prefix: Option<&str>) -> Box<dyn Iterator<Item = String> + '_> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(
                        "Skipping unreadable entry under {}: {}",
                        self.root.display(),
                        e
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let name = path::correct_slashes(&relative.to_string_lossy());
            if prefix.map_or(true, |p| path::has_prefix(&name, p)) {
                files.push(name);
            }
        }
        files.sort();
        Box::new(files.into_iter())
    }
}
