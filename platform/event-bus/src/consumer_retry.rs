//! Handler retry logic with exponential backoff
//!
//! Lets a handler absorb transient downstream failures (e.g. a storage
//! connection blip) before it reports an error to the dispatcher. Errors the
//! caller classifies as permanent are returned immediately.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How often and how patiently a handler retries
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, counting the first (0 behaves like 1)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each failure
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retry a fallible async operation with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `config` - Retry configuration
/// * `context` - Context string for logging (e.g., "audit_forward")
/// * `is_retryable` - Returns false for errors that must not be retried
///
/// # Example
/// ```rust
/// use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let value = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &config,
///     "example_operation",
///     |_err: &String| true,
/// )
/// .await?;
/// # assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    operation: F,
    config: &RetryConfig,
    context: &str,
    is_retryable: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            debug!(context = %context, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        if attempt >= attempts {
            warn!(context = %context, attempts, error = %err, "Giving up after final attempt");
            return Err(err);
        }

        warn!(
            context = %context,
            attempt,
            of = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, backing off"
        );
        sleep(delay).await;
        delay = (delay * 2).min(config.max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(
            || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            &fast_config(5),
            "test",
            |_: &String| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(
            || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("invalid input")
                }
            },
            &fast_config(5),
            "test",
            |e: &&str| *e != "invalid input",
        )
        .await;

        assert_eq!(result, Err("invalid input"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts_with_capped_backoff() {
        let attempts = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(
            || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down")
                }
            },
            &fast_config(4),
            "test",
            |_: &&str| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 10ms + 20ms + 20ms (capped)
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
