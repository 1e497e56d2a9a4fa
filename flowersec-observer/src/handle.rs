//! An atomically swappable observer handle (spec.md §9: "A default observer
//! is a process-wide no-op singleton with atomic swap for instrumentation,
//! defined as an immutable handle pointing to mutable contents behind a
//! load-store barrier").

use std::sync::{Arc, RwLock};

/// A `Clone`-able handle to a trait-object observer that can be hot-swapped
/// at runtime without interrupting callers already holding a clone of the
/// handle — each call re-reads the current `Arc` under a short read lock.
pub struct ObserverHandle<T: ?Sized> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T: ?Sized> Clone for ObserverHandle<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: ?Sized> ObserverHandle<T> {
    pub fn new(initial: Arc<T>) -> Self {
        Self { inner: Arc::new(RwLock::new(initial)) }
    }

    /// Get the currently installed observer.
    pub fn get(&self) -> Arc<T> {
        // A poisoned lock only happens if a previous holder panicked while
        // swapping; in that unlikely case fall back to whatever was last
        // written rather than propagating the poison to every caller.
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically swap in a new observer, returning the previous one.
    pub fn swap(&self, new: Arc<T>) -> Arc<T> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, new)
    }
}
