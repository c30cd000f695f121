//! Retry backoff policy shared by the stage executor and deployment controller.
//!
//! Delays grow from a base value and are capped; jitter is opt-in so that
//! retry timing stays deterministic by default.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to spread out concurrent retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Delay policy applied between failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl BackoffPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy with no delay between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let n = attempt.max(1);

        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(n - 1)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(n)).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// The final error of an operation that used up all of its attempts.
#[derive(Debug)]
pub struct RetryExhausted {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last_error: anyhow::Error,
}

/// Runs `operation` up to `max_attempts` times, sleeping per `policy`
/// between failures.
///
/// When `timeout` is set, an attempt that exceeds it is dropped and counts
/// as a failure.
pub async fn with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    timeout: Option<Duration>,
    label: &str,
    mut operation: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "attempt timed out after {}ms",
                    limit.as_millis()
                )),
            },
            None => operation(attempt).await,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after error"
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
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.jitter, JitterStrategy::None);
        assert_eq!(policy.base_delay_ms, 100);
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = BackoffPolicy::new()
            .with_base_delay_ms(100)
            .with_max_delay_ms(500);

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_linear_and_constant() {
        let linear = BackoffPolicy::new()
            .with_base_delay_ms(50)
            .with_strategy(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(3), Duration::from_millis(150));

        let constant = BackoffPolicy::new()
            .with_base_delay_ms(50)
            .with_strategy(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(7), Duration::from_millis(50));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = BackoffPolicy::new()
            .with_base_delay_ms(100)
            .with_strategy(BackoffStrategy::Constant)
            .with_jitter(JitterStrategy::Full);

        for _ in 0..20 {
            assert!(policy.delay_for(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"base_delay_ms": 5}"#).unwrap();
        assert_eq!(policy.base_delay_ms, 5);
        assert_eq!(policy.max_delay_ms, 10_000);
    }

    #[tokio::test]
    async fn test_with_retry_success_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&BackoffPolicy::immediate(), 5, None, "test", |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    anyhow::bail!("attempt {attempt}")
                }
                Ok(attempt)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_exactly() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = with_retry(&BackoffPolicy::immediate(), 3, None, "test", |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("always fails")) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.last_error.to_string(), "always fails");
    }

    #[tokio::test]
    async fn test_with_retry_timeout_counts_as_failure() {
        let err = with_retry(
            &BackoffPolicy::immediate(),
            2,
            Some(Duration::from_millis(10)),
            "slow",
            |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(err.last_error.to_string().contains("timed out"));
    }
}
