//! Single-slot watchable value with predicate-based waiters

use super::{with_timeout, TimeoutError};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

struct Inner<T> {
    value: T,
    waiters: Vec<oneshot::Sender<T>>,
}

/// Holds a current value plus a queue of waiters.
///
/// A publish replaces the value and resolves all currently queued waiters
/// with it. Waiters are never resolved with a stale value: each one receives
/// exactly the value whose publication woke it.
pub struct WatchableValue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> WatchableValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// Replace the current value and resolve all queued waiters with it.
    pub fn publish(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Mutate the current value in place, resolve all queued waiters with
    /// the result, and return it.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.value);
        let value = inner.value.clone();
        for waiter in inner.waiters.drain(..) {
            // A waiter that gave up (timeout) has dropped its receiver.
            let _ = waiter.send(value.clone());
        }
        value
    }

    /// Get the current value. May be stale by the time the caller looks.
    pub fn get(&self) -> T {
        self.inner.lock().unwrap().value.clone()
    }

    /// Return the current value if `predicate` holds, otherwise the next
    /// published value whether or not it satisfies the predicate.
    pub async fn get_if_or_next(&self, predicate: impl Fn(&T) -> bool) -> T {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if predicate(&inner.value) {
                return inner.value.clone();
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);
            rx
        };
        match rx.await {
            Ok(value) => value,
            // The sender only drops with the value itself, which the &self
            // borrow keeps alive for the duration of this future.
            Err(_) => self.get(),
        }
    }

    /// Return the first value, current or future, satisfying `predicate`.
    pub async fn wait_until(&self, predicate: impl Fn(&T) -> bool) -> T {
        loop {
            let value = self.get_if_or_next(&predicate).await;
            if predicate(&value) {
                return value;
            }
        }
    }

    /// Like [`WatchableValue::wait_until`] but gives up after `timeout`.
    pub async fn wait_until_timeout(
        &self,
        timeout: Duration,
        predicate: impl Fn(&T) -> bool,
    ) -> Option<T> {
        match with_timeout(timeout, self.wait_until(predicate)).await {
            Ok(value) => Some(value),
            Err(TimeoutError) => None,
        }
    }
}
