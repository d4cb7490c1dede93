//! Retry with exponential backoff.
//!
//! Used for IMAP connects in the receiver and for reconnects in the folder
//! monitor. SMTP sends are not retried here; lettre's pool already recycles
//! broken connections.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::errors::MailResult;

/// Upper bound of the random jitter, as a fraction of the delay.
const JITTER_FACTOR: f64 = 0.3;

/// Retry executor with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an async operation, retrying retryable failures.
    ///
    /// Non-retryable errors are returned immediately.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> MailResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MailResult<T>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        // A zero setting still runs the operation once.
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying operation after failure"
                    );

                    sleep(delay).await;
                }
            }
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);
        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            delay_ms + rand::random::<f64>() * JITTER_FACTOR * delay_ms
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{MailError, MailErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success() {
        let executor = RetryExecutor::new(fast_config(3));
        let result: MailResult<i32> = executor.execute("test", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_config(3));

        let result = executor
            .execute("connect", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(MailError::connection("refused"))
                } else {
                    Ok("connected")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_config(2));

        let result: MailResult<()> = executor
            .execute("connect", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MailError::timeout("test"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), MailErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_config(5));

        let result: MailResult<()> = executor
            .execute("login", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MailError::authentication("bad password"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_config(0));

        let result: MailResult<()> = executor
            .execute("connect", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MailError::connection("refused"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), MailErrorKind::Connection);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let executor = RetryExecutor::new(RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        });

        assert_eq!(executor.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(executor.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(executor.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(executor.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(executor.delay_for_attempt(40), Duration::from_secs(5));
    }
}
