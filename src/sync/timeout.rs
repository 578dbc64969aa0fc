//! Timeout race with exactly-once resolution

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The deadline elapsed before the operation finished
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out")]
pub struct TimeoutError;

/// Race `operation` against a deadline timer.
///
/// Whichever finishes first resolves the caller; the caller is resumed
/// exactly once even when completion and deadline land in the same
/// scheduling quantum. The loser is cancelled: a timed-out operation is
/// dropped at its current suspension point, a beaten timer is ignored.
pub async fn with_timeout<T>(
    timeout: Duration,
    operation: impl Future<Output = T>,
) -> Result<T, TimeoutError> {
    match tokio::time::timeout(timeout, operation).await {
        Ok(value) => Ok(value),
        Err(_) => Err(TimeoutError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_operation_wins() {
        let result = with_timeout(Duration::from_secs(10), async { 42u32 }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_timeout_wins() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            42u32
        })
        .await;
        assert_eq!(result, Err(TimeoutError));
    }

    #[tokio::test]
    async fn test_loser_is_cancelled() {
        let ran_to_completion = Arc::new(AtomicU32::new(0));
        let counter = ran_to_completion.clone();

        let result = with_timeout(Duration::from_millis(10), async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(result, Err(TimeoutError));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran_to_completion.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exactly_once_under_race() {
        // Completion and deadline repeatedly land in the same quantum; each
        // call must resolve exactly once, to one of the two outcomes.
        for _ in 0..50 {
            let resolutions = AtomicU32::new(0);
            let result = with_timeout(Duration::from_millis(1), async {
                tokio::time::sleep(Duration::from_millis(1)).await;
            })
            .await;
            resolutions.fetch_add(1, Ordering::SeqCst);
            assert!(result.is_ok() || result == Err(TimeoutError));
            assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        }
    }
}
