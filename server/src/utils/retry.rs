//! Async retry utilities with exponential backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Default maximum retry attempts for storage writes
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay in milliseconds for exponential backoff
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Delay before attempt `attempt + 1` (attempt is 1-based)
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(2_u64.pow(exp)))
}

/// `delay` plus a random extra of at most half of it
pub fn with_jitter(delay: Duration) -> Duration {
    let extra = delay.as_millis() as u64 / 2;
    if extra == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=extra))
}

/// Retry an async operation with exponential backoff.
///
/// Errors for which `is_retryable` returns false stop immediately.
/// Returns `Ok((value, attempts))` on success, or `Err((error, attempts))` on failure.
pub async fn retry_with_backoff_async<F, Fut, T, E, R>(
    max_attempts: u32,
    base_delay_ms: u64,
    is_retryable: R,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation(attempts).await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if attempts >= max_attempts.max(1) || !is_retryable(&e) {
                    return Err((e, attempts));
                }
                let delay = backoff_delay(base_delay_ms, attempts);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result =
            retry_with_backoff_async(3, 1, |_| true, |_| async { Ok::<_, &str>(7) }).await;
        assert_eq!(result, Ok((7, 1)));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff_async(
            3,
            1,
            |_| true,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 1 { Err("transient") } else { Ok(()) } }
            },
        )
        .await;
        assert_eq!(result, Ok(((), 2)));
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result =
            retry_with_backoff_async(3, 1, |_| true, |_| async { Err::<(), _>("persistent") })
                .await;
        assert_eq!(result, Err(("persistent", 3)));
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let result =
            retry_with_backoff_async(5, 1, |e: &&str| *e != "fatal", |_| async {
                Err::<(), _>("fatal")
            })
            .await;
        assert_eq!(result, Err(("fatal", 1)));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..20 {
            let d = with_jitter(base);
            assert!(d >= base && d <= Duration::from_millis(150));
        }
        assert_eq!(with_jitter(Duration::from_millis(1)), Duration::from_millis(1));
    }

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
    }
}
