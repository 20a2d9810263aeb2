//! Bounded retry with exponential backoff around a single async operation.

use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay,
            backoff_factor: config.backoff_factor,
        }
    }

    /// Backoff before attempt `attempt + 1`, i.e. after the failure of
    /// 1-based attempt `attempt`.
    fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * self.backoff_factor.saturating_pow(attempt.saturating_sub(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Runs `op` up to `max_attempts` times, sleeping between attempts.
    ///
    /// The in-flight call and every backoff sleep race the cancellation
    /// token; cancellation surfaces as `CoreError::Cancelled`. On
    /// exhaustion the error of the *last* attempt is returned.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> CoreResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let mut last_error = CoreError::transport(label, "retry executor ran zero attempts");

        for attempt in 1..=self.policy.max_attempts.max(1) {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                outcome = op(attempt) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(err) => {
                    let is_last = attempt == self.policy.max_attempts.max(1);
                    warn!(
                        "{}: attempt {}/{} failed: {}",
                        label, attempt, self.policy.max_attempts, err
                    );
                    last_error = err;
                    if is_last || !last_error.is_transient() {
                        break;
                    }
                    let delay = self.policy.delay_after(attempt);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2,
        })
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn succeeds_without_retrying_further() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = executor(3)
            .run("test", &CancellationToken::new(), move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CoreError>(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = executor(3)
            .run("test", &CancellationToken::new(), move |_| {
                let calls = calls_in.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CoreError::transport("src", "flaky"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reraises_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: CoreResult<u32> = executor(3)
            .run("test", &CancellationToken::new(), move |attempt| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::transport("src", format!("boom {}", attempt)))
                }
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("boom 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_stop_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: CoreResult<u32> = executor(3)
            .run("test", &CancellationToken::new(), move |_| {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CoreError::state("bad transition"))
                }
            })
            .await;
        assert_eq!(result.unwrap_err().code(), "STATE_VIOLATION");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        let slow = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            backoff_factor: 2,
        });
        let handle = tokio::spawn(async move {
            slow.run("test", &cancel_in, |_| async {
                Err::<u32, _>(CoreError::transport("src", "down"))
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap_err().code(), "CANCELLED");
    }
}
