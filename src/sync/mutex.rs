//! Asynchronous mutual exclusion over an owned value

use std::ops::{Deref, DerefMut};

/// An async mutex that owns the value it protects.
///
/// Contending tasks queue and are suspended, not blocked, so the lock can be
/// held across long asynchronous critical sections (an FFI round trip during
/// start or stop) while other callers wait without pinning a worker thread.
/// The guard releases the lock on every exit path, including early returns
/// and errors.
pub struct AsyncMutex<T> {
    inner: tokio::sync::Mutex<T>,
}

/// RAII guard giving mutable access to the protected value
pub struct AsyncMutexGuard<'a, T> {
    inner: tokio::sync::MutexGuard<'a, T>,
}

impl<T> AsyncMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(value),
        }
    }

    /// Acquire exclusive access, suspending until the lock is free.
    pub async fn lock(&self) -> AsyncMutexGuard<'_, T> {
        AsyncMutexGuard {
            inner: self.inner.lock().await,
        }
    }

    /// Run a synchronous closure under the lock and return its result.
    ///
    /// For critical sections that themselves await, acquire the guard with
    /// [`AsyncMutex::lock`] and hold it across the await points instead.
    pub async fn with_lock<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock().await;
        body(&mut guard)
    }
}

impl<T> Deref for AsyncMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for AsyncMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
