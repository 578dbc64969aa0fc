//! Outstanding-task counter with drain waiting

use super::Callbacks;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Tracks a count of outstanding tasks and lets callers wait for it to
/// drain to zero.
///
/// Internally synchronized; all methods are safe to call concurrently.
pub struct PendingTasks {
    count: Mutex<u64>,
    waiting: Callbacks<()>,
}

/// RAII handle for one outstanding task; completes it on drop.
pub struct PendingTaskGuard<'a> {
    tasks: &'a PendingTasks,
}

impl Default for PendingTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTasks {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            waiting: Callbacks::new(),
        }
    }

    /// Record that `tasks` tasks have been started.
    pub fn start(&self, tasks: u64) {
        let mut count = self.count.lock().unwrap();
        *count += tasks;
    }

    /// Record that `tasks` tasks have completed.
    ///
    /// Completing more tasks than were started is a logic error; the count
    /// is clamped to zero and the imbalance logged.
    pub fn complete(&self, tasks: u64) {
        let mut count = self.count.lock().unwrap();
        if tasks > *count {
            log::error!("More tasks completed ({tasks}) than running ({count})");
            *count = 0;
        } else {
            *count -= tasks;
        }
        if *count == 0 {
            self.waiting.dispatch(());
        }
    }

    /// Start one task and return a guard that completes it on drop.
    pub fn guard(&self) -> PendingTaskGuard<'_> {
        self.start(1);
        PendingTaskGuard { tasks: self }
    }

    /// Wait until there are no outstanding tasks.
    ///
    /// Returns the first time the count reaches zero, or immediately if it
    /// already is. Tasks started while waiting are waited for too.
    pub async fn wait_for_all(&self) {
        let rx = {
            let count = self.count.lock().unwrap();
            if *count == 0 {
                return;
            }
            let (tx, rx) = oneshot::channel();
            self.waiting.add(move |()| {
                let _ = tx.send(());
            });
            rx
        };
        // The waiting set only drops with self, which our borrow keeps
        // alive, so this resolves on the transition to zero.
        let _ = rx.await;
    }
}

impl Drop for PendingTaskGuard<'_> {
    fn drop(&mut self) {
        self.tasks.complete(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_idle() {
        let tasks = PendingTasks::new();
        tasks.wait_for_all().await;
    }

    #[tokio::test]
    async fn test_wait_resolves_on_transition_to_zero() {
        let tasks = Arc::new(PendingTasks::new());
        tasks.start(2);

        let waiter = {
            let tasks = tasks.clone();
            tokio::spawn(async move {
                tasks.wait_for_all().await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tasks.complete(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiter.is_finished());

        tasks.complete(1);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_over_complete_clamps_to_zero() {
        let tasks = PendingTasks::new();
        tasks.start(1);
        tasks.complete(5);
        // Clamped, not panicked; the counter is drained.
        tasks.wait_for_all().await;
    }

    #[tokio::test]
    async fn test_guard_completes_on_drop() {
        let tasks = Arc::new(PendingTasks::new());
        {
            let _guard = tasks.guard();
            let _second = tasks.guard();
        }
        tasks.wait_for_all().await;
    }
}
