//! Index and key cells exposed to nested bindings of an iteration.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slab::Slab;

use crate::keypath::Key;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct CellInner<T> {
    value: T,
    version: u64,
    subscribers: Slab<Callback<T>>,
}

/// A single-value reactive cell.
///
/// Cloning yields another handle to the same cell.
pub struct ReactiveCell<T> {
    inner: Arc<Mutex<CellInner<T>>>,
}

/// Current position of an iteration.
pub type IndexCell = ReactiveCell<usize>;

/// Current key of an iteration.
pub type KeyCell = ReactiveCell<Key>;

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ReactiveCell<T> {
    /// Create a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CellInner {
                value,
                version: 0,
                subscribers: Slab::new(),
            })),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    /// Number of times the cell was applied.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Force-set the value and notify subscribers, even if it is unchanged.
    pub fn apply(&self, value: T) {
        let callbacks: Vec<Callback<T>> = {
            let mut inner = self.inner.lock();
            inner.value = value.clone();
            inner.version += 1;
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Call `callback` after every [`apply`](ReactiveCell::apply) until the
    /// returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let slot = self.inner.lock().subscribers.insert(Arc::new(callback));
        let weak: Weak<Mutex<CellInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().subscribers.try_remove(slot);
                }
            })),
        }
    }

    /// Returns true if both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReactiveCell")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

/// Guard returned by [`ReactiveCell::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
