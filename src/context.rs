//! Active bundle context
//!
//! Each thread has its own "bundle in use right now". Installing a bundle
//! is not a plain setter: unless suppressed, it notifies every registered
//! observer (a texture cache that must drop stub textures, for instance).
//! Observers and the active language are process-wide; the bundle slot is
//! per thread and invisible to other threads.
//!
//! The slot holds a shared handle, so an installed bundle stays open until
//! [`release`] or [`clear_current`] drops it; only then can the owner get
//! the exclusive access `close` needs.

use crate::bundle::AssetBundle;
use crate::error::{BundleError, Result};
use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::debug;

type Observer = Arc<dyn Fn() + Send + Sync>;

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn AssetBundle>>> = const { RefCell::new(None) };
}

static OBSERVERS: Mutex<Vec<(u64, Observer)>> = const_mutex(Vec::new());
static NEXT_OBSERVER_ID: Mutex<u64> = const_mutex(0);
static LANGUAGE: RwLock<Option<String>> = const_rwlock(None);

/// Handle returned by [`add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Register a callback fired whenever a bundle is installed
pub fn add_observer<F>(observer: F) -> ObserverId
where
    F: Fn() + Send + Sync + 'static,
{
    let id = {
        let mut next = NEXT_OBSERVER_ID.lock();
        *next += 1;
        *next
    };
    let observer: Observer = Arc::new(observer);
    OBSERVERS.lock().push((id, observer));
    ObserverId(id)
}

pub fn remove_observer(id: ObserverId) -> bool {
    let mut observers = OBSERVERS.lock();
    let before = observers.len();
    observers.retain(|(observer_id, _)| *observer_id != id.0);
    observers.len() != before
}

/// Install `bundle` as this thread's active bundle. With `notify`, every
/// observer runs afterwards on the calling thread.
pub fn set_current(bundle: Arc<dyn AssetBundle>, notify: bool) {
    CURRENT.with(|current| *current.borrow_mut() = Some(bundle));
    debug!("Active bundle replaced (notify: {})", notify);
    if notify {
        // Snapshot so observers may register or remove observers themselves
        let observers: Vec<Observer> = OBSERVERS.lock().iter().map(|(_, o)| o.clone()).collect();
        for observer in observers {
            observer();
        }
    }
}

/// Clear this thread's slot if it holds `bundle`. Call before closing a
/// bundle that may be active so the slot never hands out a closed bundle.
pub fn release(bundle: &Arc<dyn AssetBundle>) -> bool {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        let installed = current
            .as_ref()
            .is_some_and(|c| Arc::as_ptr(c) as *const () == Arc::as_ptr(bundle) as *const ());
        if installed {
            *current = None;
            debug!("Active bundle released");
        }
        installed
    })
}

/// Remove this thread's active bundle, returning it
pub fn clear_current() -> Option<Arc<dyn AssetBundle>> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// This thread's active bundle
pub fn current() -> Result<Arc<dyn AssetBundle>> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or_else(|| {
            BundleError::InvalidState("the active bundle must be set before use".to_string())
        })
}

pub fn is_initialized() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Language used by localized lookups, e.g. `"ru"`
pub fn set_current_language<S: Into<String>>(language: Option<S>) {
    *LANGUAGE.write() = language.map(Into::into);
}

pub fn current_language() -> Option<String> {
    LANGUAGE.read().clone()
}
