//! Read-only overlay of several bundles
//!
//! Layers are searched in attachment order and the first layer that has a
//! path answers for it. The layer list sits behind one reader-writer lock:
//! queries share it, attach/detach/dispose take it exclusively. Nothing here
//! guards concurrent mutation inside a layer.

use crate::attributes::AssetAttributes;
use crate::bundle::{AssetBundle, ImportOptions};
use crate::error::{BundleError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle for detaching a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

struct Layer {
    id: LayerId,
    bundle: Box<dyn AssetBundle>,
}

#[derive(Default)]
pub struct AggregateBundle {
    layers: RwLock<Vec<Layer>>,
    next_id: AtomicU64,
}

impl AggregateBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer behind the existing ones
    pub fn attach(&self, bundle: Box<dyn AssetBundle>) -> LayerId {
        let id = LayerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut layers = self.layers.write();
        layers.push(Layer { id, bundle });
        tracing::debug!("Attached layer {:?} ({} layers)", id, layers.len());
        id
    }

    /// Remove a layer without closing it; the caller owns it again
    pub fn detach(&self, id: LayerId) -> Option<Box<dyn AssetBundle>> {
        let mut layers = self.layers.write();
        let position = layers.iter().position(|layer| layer.id == id)?;
        let layer = layers.remove(position);
        tracing::debug!("Detached layer {:?} ({} layers)", id, layers.len());
        Some(layer.bundle)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.read().len()
    }

    /// Close every layer and empty the list. All layers are closed even when
    /// one fails; the first failure is returned.
    pub fn dispose(&self) -> Result<()> {
        let mut layers = self.layers.write();
        let mut first_error = None;
        for layer in layers.iter_mut() {
            if let Err(e) = layer.bundle.close() {
                tracing::warn!("Failed to close layer {:?}: {}", layer.id, e);
                first_error.get_or_insert(e);
            }
        }
        layers.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Run `query` against the first layer that has `path`
    fn with_owner<T>(
        &self,
        path: &str,
        query: impl FnOnce(&dyn AssetBundle) -> Result<T>,
    ) -> Result<T> {
        let layers = self.layers.read();
        let owner = layers
            .iter()
            .find(|layer| layer.bundle.file_exists(path))
            .ok_or_else(|| BundleError::NotFound(path.to_string()))?;
        query(&*owner.bundle)
    }

    fn read_only(&self, operation: &str, path: &str) -> BundleError {
        BundleError::Unsupported(format!(
            "{} '{}' on an aggregate bundle; target a concrete layer",
            operation, path
        ))
    }
}

impl AssetBundle for AggregateBundle {
    fn open_file(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        self.with_owner(path, |bundle| bundle.open_file(path))
    }

    fn file_last_write_time(&self, path: &str) -> Result<DateTime<Utc>> {
        self.with_owner(path, |bundle| bundle.file_last_write_time(path))
    }

    fn cooking_rules_sha1(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.with_owner(path, |bundle| bundle.cooking_rules_sha1(path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.with_owner(path, |bundle| bundle.file_size(path))
    }

    fn delete_file(&mut self, path: &str) -> Result<()> {
        Err(self.read_only("delete", path))
    }

    fn file_exists(&self, path: &str) -> bool {
        self.layers
            .read()
            .iter()
            .any(|layer| layer.bundle.file_exists(path))
    }

    fn attributes(&self, path: &str) -> Result<AssetAttributes> {
        self.with_owner(path, |bundle| bundle.attributes(path))
    }

    fn set_attributes(&mut self, path: &str, _attributes: AssetAttributes) -> Result<()> {
        Err(self.read_only("set attributes of", path))
    }

    fn import_file(
        &mut self,
        path: &str,
        _data: &mut dyn Read,
        _options: &ImportOptions,
    ) -> Result<()> {
        Err(self.read_only("import", path))
    }

    /// Every layer's paths in layer order. A path present in several layers
    /// is yielded once per layer.
    fn enumerate_files(&self, prefix: Option<&str>) -> Box<dyn Iterator<Item = String> + '_> {
        let layers = self.layers.read();
        let files: Vec<String> = layers
            .iter()
            .flat_map(|layer| layer.bundle.enumerate_files(prefix))
            .collect();
        Box::new(files.into_iter())
    }

    fn close(&mut self) -> Result<()> {
        self.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpacked::UnpackedBundle;
    use std::fs;
    use tempfile::TempDir;

    fn layer(files: &[(&str, &str)]) -> (TempDir, Box<dyn AssetBundle>) {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            fs::write(dir.path().join(name), body).unwrap();
        }
        let bundle = UnpackedBundle::new(dir.path()).unwrap();
        (dir, Box::new(bundle))
    }

    #[test]
    fn test_first_layer_wins() {
        let (_d1, b1) = layer(&[("a.txt", "first")]);
        let (_d2, b2) = layer(&[("a.txt", "second"), ("b.txt", "only")]);
        let aggregate = AggregateBundle::new();
        aggregate.attach(b1);
        aggregate.attach(b2);

        assert_eq!(aggregate.read_file("a.txt").unwrap(), b"first");
        assert!(aggregate.file_exists("b.txt"));
        assert_eq!(aggregate.file_size("b.txt").unwrap(), 4);
        assert!(matches!(
            aggregate.open_file("c.txt"),
            Err(BundleError::NotFound(_))
        ));
    }

    #[test]
    fn test_enumeration_keeps_duplicates() {
        let (_d1, b1) = layer(&[("a.txt", "1")]);
        let (_d2, b2) = layer(&[("a.txt", "2"), ("b.txt", "3")]);
        let aggregate = AggregateBundle::new();
        aggregate.attach(b1);
        aggregate.attach(b2);

        let all: Vec<String> = aggregate.enumerate_files(None).collect();
        assert_eq!(all, vec!["a.txt", "a.txt", "b.txt"]);
        let only_b: Vec<String> = aggregate.enumerate_files(Some("B")).collect();
        assert_eq!(only_b, vec!["b.txt"]);
    }

    #[test]
    fn test_detach_returns_ownership() {
        let (_d1, b1) = layer(&[("a.txt", "first")]);
        let (_d2, b2) = layer(&[("a.txt", "second")]);
        let aggregate = AggregateBundle::new();
        let first = aggregate.attach(b1);
        aggregate.attach(b2);

        let detached = aggregate.detach(first).unwrap();
        assert!(aggregate.detach(first).is_none());
        assert_eq!(aggregate.layer_count(), 1);
        assert_eq!(aggregate.read_file("a.txt").unwrap(), b"second");
        assert_eq!(detached.read_file("a.txt").unwrap(), b"first");
    }

    #[test]
    fn test_mutations_are_unsupported() {
        let (_d1, b1) = layer(&[("a.txt", "1")]);
        let mut aggregate = AggregateBundle::new();
        aggregate.attach(b1);
        assert!(matches!(
            aggregate.delete_file("a.txt"),
            Err(BundleError::Unsupported(_))
        ));
        assert!(matches!(
            aggregate.import_file("n.txt", &mut &b"x"[..], &ImportOptions::new()),
            Err(BundleError::Unsupported(_))
        ));
        assert!(matches!(
            aggregate.set_attributes("a.txt", AssetAttributes::NONE),
            Err(BundleError::Unsupported(_))
        ));
    }

    #[test]
    fn test_dispose_clears_layers() {
        let (_d1, b1) = layer(&[("a.txt", "1")]);
        let mut aggregate = AggregateBundle::new();
        aggregate.attach(b1);
        aggregate.close().unwrap();
        assert_eq!(aggregate.layer_count(), 0);
        assert!(!aggregate.file_exists("a.txt"));
    }
}
