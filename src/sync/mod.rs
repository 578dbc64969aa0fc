//! Concurrency primitives used by the provider lifecycle
//!
//! These are small, internally synchronized building blocks layered on the
//! async runtime. They exist because the host framework delivers callbacks
//! on its own threads while lifecycle operations run as cooperative tasks;
//! everything here suspends waiters instead of blocking worker threads.

mod callbacks;
mod mutex;
mod pending;
mod timeout;
mod watchable;

pub use callbacks::{CallbackId, Callbacks};
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use pending::{PendingTaskGuard, PendingTasks};
pub use timeout::{with_timeout, TimeoutError};
pub use watchable::WatchableValue;
