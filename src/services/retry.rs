use std::{fmt, future::Future, time::Duration};

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::{config::RetrySettings, services::backoff::BackoffPolicy};

/// Failure returned once a retried task has used up its budget.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E> {
    /// Number of times the task was invoked.
    pub attempts: u32,
    /// Error returned by the final invocation.
    #[source]
    pub last: E,
}

impl<E> RetryError<E> {
    /// Discard the attempt count and keep the last error.
    pub fn into_last(self) -> E {
        self.last
    }
}

/// Runs a write with a bounded number of attempts, sleeping per the backoff policy in between.
///
/// Every failure is retried the same way. The task must be safe to invoke again; nothing here
/// deduplicates side effects.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_attempts: u32,
    backoff: BackoffPolicy,
    max_elapsed: Option<Duration>,
}

impl Retrier {
    /// Retry up to `max_attempts` times in total (at least once).
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            max_elapsed: None,
        }
    }

    /// Additionally stop once the next sleep would push the total time past `limit`.
    pub fn with_max_elapsed(mut self, limit: Duration) -> Self {
        self.max_elapsed = Some(limit);
        self
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invoke `task` until it succeeds or the budget runs out, returning the last error then.
    pub async fn run<F, Fut, T, E>(&self, mut task: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match task().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retried task succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                warn!(attempt, error = %err, "retry budget exhausted");
                return Err(RetryError {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff.delay(attempt - 1);
            if let Some(limit) = self.max_elapsed {
                if started.elapsed() + delay > limit {
                    warn!(
                        attempt,
                        limit_ms = millis(limit),
                        error = %err,
                        "retry time ceiling reached"
                    );
                    return Err(RetryError {
                        attempts: attempt,
                        last: err,
                    });
                }
            }

            warn!(
                attempt,
                delay_ms = millis(delay),
                error = %err,
                "task failed; retrying after backoff"
            );
            sleep(delay).await;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&RetrySettings> for Retrier {
    fn from(settings: &RetrySettings) -> Self {
        let retrier = Retrier::new(settings.max_attempts, settings.backoff);
        match settings.max_elapsed {
            Some(limit) => retrier.with_max_elapsed(limit),
            None => retrier,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::testing::assert_elapsed;

    const BASE: Duration = Duration::from_millis(400);

    fn retrier(max_attempts: u32) -> Retrier {
        Retrier::new(max_attempts, BackoffPolicy::new(BASE, Duration::from_secs(30)))
    }

    fn failing_then_ok(
        failures: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, String>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n <= failures {
                Err(format!("failure #{n}"))
            } else {
                Ok(n)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let value = retrier(5)
            .run(failing_then_ok(2, calls.clone()))
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_elapsed(started.elapsed(), BASE + BASE * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_task_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retrier(5)
            .run(failing_then_ok(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(err.attempts, 5);
        assert_eq!(err.last, "failure #5");
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_sleeps() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let err = retrier(1)
            .run(failing_then_ok(1, calls.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_elapsed(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_ceiling_stops_before_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retrier(5)
            .with_max_elapsed(Duration::from_millis(1_000))
            .run(failing_then_ok(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        // 400ms fits under the ceiling, the following 800ms does not.
        assert_eq!(err.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_error_reports_attempts_and_keeps_the_cause() {
        let err = retrier(2)
            .run(|| async { Err::<(), _>(std::io::Error::other("connection reset")) })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "gave up after 2 attempts: connection reset");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
        assert_eq!(err.into_last().kind(), std::io::ErrorKind::Other);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(retrier(0).max_attempts(), 1);
    }
}
