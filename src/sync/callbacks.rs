//! One-shot callback registry with cancellation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Handle returned by [`Callbacks::add`], used to cancel a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type BoxedCallback<V> = Box<dyn FnOnce(V) + Send>;

/// Track a set of one-shot callbacks that can be triggered together.
pub struct Callbacks<V> {
    pending: Mutex<HashMap<CallbackId, BoxedCallback<V>>>,
    next_id: AtomicU64,
}

impl<V> Default for Callbacks<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Callbacks<V> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Add a callback to the pending set.
    ///
    /// The returned id can be used to cancel it.
    pub fn add(&self, f: impl FnOnce(V) + Send + 'static) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().unwrap().insert(id, Box::new(f));
        id
    }

    /// Cancel a pending callback.
    ///
    /// Does nothing if the callback has already fired or been removed.
    pub fn remove(&self, id: CallbackId) {
        self.pending.lock().unwrap().remove(&id);
    }

    /// Number of callbacks currently pending
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Callbacks<V> {
    /// Trigger all pending callbacks with `value` and clear the set.
    ///
    /// The pending set is swapped out before any callback runs, so dispatch
    /// is re-entrant: callbacks registered during dispatch are deferred to
    /// the next dispatch, and a callback dispatching again does not loop.
    pub fn dispatch(&self, value: V) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, callback) in pending {
            callback(value.clone());
        }
    }
}
