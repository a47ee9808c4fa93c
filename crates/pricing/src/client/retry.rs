//! Transient-failure retry with capped exponential backoff.
//!
//! Wraps a source fetch and re-issues it when the failure is classified as
//! transient. The backoff schedule doubles and every individual sleep is
//! capped - the cap bounds the sleep duration, never the retry count.

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::errors::{ProviderError, RetryClass};

/// Default backoff schedule. Attempts past the end keep doubling the last
/// entry.
const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// Default total attempt budget (first try included).
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default cap on a single backoff sleep.
const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(8);

/// Retry configuration.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Backoff schedule indexed by completed failures. Past the end, the
    /// last entry keeps doubling.
    pub backoff: Vec<Duration>,
    /// Total attempts, the first try included.
    pub max_attempts: u32,
    /// Cap applied to each individual sleep (not to the retry count).
    pub max_sleep: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF.to_vec(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_sleep: DEFAULT_MAX_SLEEP,
        }
    }
}

impl RetryConfig {
    /// Default configuration with environment overrides applied.
    ///
    /// `LOOTHOUND_RETRY_MAX_ATTEMPTS` and `LOOTHOUND_RETRY_MAX_SLEEP_MS`
    /// let tests and CI force deterministic, near-zero sleeps.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(attempts) = std::env::var("LOOTHOUND_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_attempts = attempts;
        }
        if let Some(millis) = std::env::var("LOOTHOUND_RETRY_MAX_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_sleep = Duration::from_millis(millis);
        }
        config
    }
}

/// Retry policy for source fetches.
///
/// [`execute`](Self::execute) classifies each failure via
/// [`ProviderError::retry_class`] and either re-issues the operation after a
/// backoff sleep or returns the error to the caller. On exhaustion the
/// *last* error is returned - never a panic, and never an abort of the
/// surrounding resolution.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy with the default schedule.
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Create a policy with custom configuration.
    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `op`, retrying transient failures.
    ///
    /// `source` is used for log attribution only.
    pub async fn execute<T, F, Fut>(&self, source: &str, op: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut failures = 0u32;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error.retry_class() {
                RetryClass::Fatal => {
                    debug!("{}: fatal error, not retrying: {}", source, error);
                    return Err(error);
                }
                RetryClass::NoRetry => {
                    debug!("{}: unusable response, not retrying: {}", source, error);
                    return Err(error);
                }
                RetryClass::Backoff => {
                    failures += 1;
                    if failures >= self.config.max_attempts {
                        debug!(
                            "{}: giving up after {} attempts: {}",
                            source, failures, error
                        );
                        return Err(error);
                    }

                    let sleep = self.backoff_for(failures - 1);
                    debug!(
                        "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                        source, failures, self.config.max_attempts, sleep, error
                    );
                    tokio::time::sleep(sleep).await;
                }
            }
        }
    }

    /// Backoff sleep after the given number of completed failures.
    fn backoff_for(&self, failure: u32) -> Duration {
        let base = match self.config.backoff.get(failure as usize) {
            Some(delay) => *delay,
            None => {
                // Keep doubling the last schedule entry.
                let last = self.config.backoff.last().copied().unwrap_or(Duration::ZERO);
                let doublings = failure as usize + 1 - self.config.backoff.len();
                last.saturating_mul(2u32.saturating_pow(doublings as u32))
            }
        };
        base.min(self.config.max_sleep)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::with_config(RetryConfig {
            backoff: vec![Duration::from_millis(1)],
            max_attempts,
            max_sleep: Duration::from_millis(2),
        })
    }

    fn transient() -> ProviderError {
        ProviderError::RateLimited {
            source: "trade".to_string(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_k_transient_failures() {
        let policy = fast_policy(4);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute("trade", || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(transient())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        // Two failures, one success: three calls, two sleeps.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let policy = fast_policy(3);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = policy
            .execute("trade", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let policy = fast_policy(4);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = policy
            .execute("trade", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::BadRequest {
                        source: "trade".to_string(),
                        message: "unknown filter".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::BadRequest { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_retries_zero_times() {
        let policy = fast_policy(4);
        let calls = AtomicU32::new(0);

        let result: Result<u32, _> = policy
            .execute("ninja", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::MalformedResponse {
                        source: "ninja".to_string(),
                        message: "missing lines array".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ProviderError::MalformedResponse { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_schedule_doubles_past_the_end() {
        let policy = RetryPolicy::with_config(RetryConfig {
            backoff: vec![Duration::from_secs(2), Duration::from_secs(4)],
            max_attempts: 10,
            max_sleep: Duration::from_secs(60),
        });

        assert_eq!(policy.backoff_for(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_sleeps_are_capped() {
        let policy = RetryPolicy::with_config(RetryConfig {
            backoff: vec![Duration::from_secs(2), Duration::from_secs(4)],
            max_attempts: 10,
            max_sleep: Duration::from_secs(3),
        });

        // The cap applies to the sleep duration, not the retry count.
        assert_eq!(policy.backoff_for(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(3));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(3));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("LOOTHOUND_RETRY_MAX_ATTEMPTS", "2");
        std::env::set_var("LOOTHOUND_RETRY_MAX_SLEEP_MS", "5");

        let config = RetryConfig::from_env();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.max_sleep, Duration::from_millis(5));

        std::env::remove_var("LOOTHOUND_RETRY_MAX_ATTEMPTS");
        std::env::remove_var("LOOTHOUND_RETRY_MAX_SLEEP_MS");
    }
}
