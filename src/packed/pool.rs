//! Pooled read handles
//!
//! Each open asset stream owns one handle exclusively until it is dropped.
//! The mutex only guards acquire and release; reads through an acquired
//! handle need no further locking.

use crate::error::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A seekable byte source a stream can own
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where read handles come from
#[derive(Debug, Clone)]
pub enum BundleSource {
    /// A bundle file on disk, opened read-only per handle
    File(PathBuf),
    /// A bundle image compiled into the binary
    Embedded {
        name: String,
        bytes: &'static [u8],
    },
}

impl BundleSource {
    fn open(&self) -> Result<Box<dyn ReadSeek>> {
        match self {
            BundleSource::File(path) => Ok(Box::new(File::open(path)?)),
            BundleSource::Embedded { bytes, .. } => Ok(Box::new(Cursor::new(*bytes))),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            BundleSource::File(path) => path.display().to_string(),
            BundleSource::Embedded { name, .. } => name.clone(),
        }
    }
}

/// Pool of idle read handles for one bundle
pub struct StreamPool {
    source: BundleSource,
    idle: Mutex<Vec<Box<dyn ReadSeek>>>,
    max_idle: usize,
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

impl StreamPool {
    pub fn new(source: BundleSource, max_idle: usize) -> Arc<Self> {
        Arc::new(StreamPool {
            source,
            idle: Mutex::new(Vec::new()),
            max_idle,
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Take an idle handle or open a new one
    pub fn acquire(self: &Arc<Self>) -> Result<PooledHandle> {
        let reused = self.idle.lock().pop();
        let handle = match reused {
            Some(handle) => handle,
            None => self.source.open()?,
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(PooledHandle {
            handle: Some(handle),
            pool: Arc::clone(self),
        })
    }

    fn release(&self, handle: Box<dyn ReadSeek>) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(handle);
        }
    }

    /// Drop idle handles; handles still in use are dropped on release
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.idle.lock().clear();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Handles currently owned by streams
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// A read handle owned by exactly one caller; returns to the pool on drop
pub struct PooledHandle {
    handle: Option<Box<dyn ReadSeek>>,
    pool: Arc<StreamPool>,
}

impl PooledHandle {
    pub fn get_mut(&mut self) -> &mut Box<dyn ReadSeek> {
        // The slot is only emptied by `give_back`, which runs on consumption
        self.handle
            .as_mut()
            .expect("pooled handle used after release")
    }

    /// Return the handle now instead of at drop
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        self.give_back();
    }
}
