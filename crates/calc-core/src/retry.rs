//! Generic retry-with-backoff helper shared by the dispatcher and the
//! calculation use-case.

use std::future::Future;
use std::time::Duration;

/// Retry `f` up to `max_attempts` times, sleeping `base_delay * 2^attempt`
/// between attempts. `is_retryable` decides whether a given error is worth
/// another attempt; a non-retryable error aborts immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    is_retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let backoff = base_delay * 2u32.pow(attempt - 1);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Whether a transient-error message matches the retry vocabulary used by
/// `update_calculation_status`: timeouts, cancellation, or an overloaded
/// agent.
pub fn message_is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "temporary", "retriable", "agent busy"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            3,
            Duration::from_millis(1),
            |_: &&str| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            3,
            Duration::from_millis(1),
            |_: &&str| true,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("transient") } else { Ok(7) }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            5,
            Duration::from_millis(1),
            |_: &&str| false,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            3,
            Duration::from_millis(1),
            |_: &&str| true,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still failing")
            },
        )
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn transient_message_detection() {
        assert!(message_is_transient("connection timeout"));
        assert!(message_is_transient("Agent busy, try later"));
        assert!(!message_is_transient("division by zero"));
    }
}
