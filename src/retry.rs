//! Exponential-backoff retry wrapper for provider calls.
//!
//! [`BackoffRetry`] runs an async operation up to `max_retries + 1` times,
//! sleeping between attempts:
//!
//! ```text
//! delay(i) = min(base_delay * backoff_factor^i, max_delay) + rand(0..=jitter)
//! ```
//!
//! where `i` is the 0-indexed attempt that just failed. There is no sleep
//! before the first attempt or after the last one.
//!
//! Which errors are worth retrying is decided by the caller through a
//! predicate ([`BackoffRetry::call_if`]); [`BackoffRetry::call`] retries every
//! error.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use litfetch_core::{BackoffRetry, RetryPolicy};
//!
//! # async fn example() {
//! let retry = BackoffRetry::new(RetryPolicy {
//!     base_delay: Duration::from_millis(10),
//!     ..RetryPolicy::default()
//! });
//!
//! let result: Result<u32, String> = retry.call(|| async { Ok(42) }).await;
//! assert_eq!(result, Ok(42));
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default delay cap (60 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default multiplier applied per attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Backoff settings. Immutable for the duration of a call.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `base_delay`: 1 second
/// - `max_delay`: 60 seconds
/// - `backoff_factor`: 2.0
/// - `jitter`: none
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    pub max_delay: Duration,
    /// Multiplier per attempt (>= 1.0).
    pub backoff_factor: f64,
    /// Upper bound of the random extra delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Total attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff delay after the 0-indexed `attempt` failed, without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter.is_zero() {
            return delay;
        }
        let max_jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

/// Outcome of a retried operation plus how many times it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport<T, E> {
    /// The successful value, or the last error.
    pub result: Result<T, E>,
    /// Times the operation was invoked (>= 1).
    pub attempts: u32,
}

/// Retries async operations with exponential backoff.
#[derive(Debug, Clone)]
pub struct BackoffRetry {
    policy: RetryPolicy,
    enabled: bool,
}

impl BackoffRetry {
    /// Creates a retry wrapper with the given policy.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            enabled: true,
        }
    }

    /// Creates a wrapper that runs every operation exactly once.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            policy: RetryPolicy::default(),
            enabled: false,
        }
    }

    /// Returns the configured policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns true unless created with [`BackoffRetry::disabled`].
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Runs `op`, retrying every error.
    ///
    /// # Errors
    ///
    /// Returns the last error once all attempts are exhausted.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(op, |_| true).await.result
    }

    /// Runs `op`, retrying only errors for which `is_retryable` returns true.
    ///
    /// A fatal error is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, or the last error once all attempts
    /// are exhausted.
    pub async fn call_if<T, E, F, Fut, P>(&self, op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.run_if(op, is_retryable).await.result
    }

    /// Like [`BackoffRetry::call_if`], also reporting how many attempts ran.
    #[instrument(skip_all, fields(max_attempts = self.max_attempts()))]
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> RetryReport<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            let result = op().await;
            attempt += 1;

            let error = match result {
                Ok(value) => {
                    return RetryReport {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => error,
            };

            if attempt >= max_attempts {
                debug!(attempt, "max attempts reached");
                return RetryReport {
                    result: Err(error),
                    attempts: attempt,
                };
            }
            if !is_retryable(&error) {
                debug!(attempt, "fatal error, not retrying");
                return RetryReport {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let delay = self.policy.delay_with_jitter(attempt - 1);
            debug!(
                attempt,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                "will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.policy.max_attempts()
        } else {
            1
        }
    }
}

impl Default for BackoffRetry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn policy(max_retries: u32, base_secs: u64, factor: f64, max_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
            backoff_factor: factor,
            jitter: Duration::ZERO,
        }
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_delay_for_attempt_exponential() {
        let policy = policy(3, 1, 2.0, 60);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_for_attempt_capped_at_max() {
        let policy = policy(10, 1, 2.0, 10);
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_factor_one_is_constant() {
        let policy = policy(3, 2, 1.0, 60);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(250),
            ..policy(3, 1, 2.0, 60)
        };
        for _ in 0..100 {
            let delay = policy.delay_with_jitter(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert!(policy.jitter.is_zero());
    }

    // ==================== Call Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_call_always_failing_runs_max_retries_plus_one() {
        let retry = BackoffRetry::new(policy(3, 1, 2.0, 60));
        let calls = Mutex::new(Vec::new());
        let log = &calls;

        let result: Result<(), String> = retry
            .call(move || async move {
                let mut log = log.lock().unwrap();
                log.push(Instant::now());
                Err(format!("failure {}", log.len()))
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 4");
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_no_sleep_after_final_attempt() {
        let retry = BackoffRetry::new(policy(2, 1, 2.0, 60));
        let start = Instant::now();

        let _: Result<(), &str> = retry.call(|| async { Err("nope") }).await;

        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_succeeds_after_transient_failures() {
        let retry = BackoffRetry::new(policy(3, 1, 2.0, 60));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<&str, &str> = retry
            .call(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("flaky")
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_call_first_success_has_no_delay() {
        let retry = BackoffRetry::new(policy(3, 60, 2.0, 60));
        let start = std::time::Instant::now();

        let result: Result<u8, ()> = retry.call(|| async { Ok(1) }).await;

        assert_eq!(result, Ok(1));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_if_fatal_error_stops_immediately() {
        let retry = BackoffRetry::new(policy(5, 1, 2.0, 60));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), &str> = retry
            .call_if(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                },
                |error: &&str| *error != "fatal",
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_if_reports_attempts() {
        let retry = BackoffRetry::new(policy(3, 1, 2.0, 60));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let report: RetryReport<(), &str> = retry
            .run_if(
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient")
                    } else {
                        Err("fatal")
                    }
                },
                |error: &&str| *error == "transient",
            )
            .await;

        assert_eq!(report.attempts, 2);
        assert_eq!(report.result, Err("fatal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_runs_exactly_once() {
        let retry = BackoffRetry::disabled();
        assert!(!retry.is_enabled());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let report: RetryReport<(), &str> = retry
            .run_if(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("boom")
                },
                |_| true,
            )
            .await;

        assert_eq!(report.attempts, 1);
        assert_eq!(report.result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let retry = BackoffRetry::new(policy(0, 1, 2.0, 60));
        let start = Instant::now();

        let report: RetryReport<(), &str> = retry.run_if(|| async { Err("x") }, |_| true).await;

        assert_eq!(report.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
