// Bounded retry with exponential backoff.
// One combinator shared by the rate-limit and transient-failure paths.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::error::ApiError;

/// How many times to try a request and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub initial_delay: Duration,
    /// Cap on any single delay, including server-provided hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries + 1,
            initial_delay: config.retry_base_delay(),
            max_delay: config.rate_limit_max_wait(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
///
/// Server `Retry-After`/reset hints replace the computed backoff. A hint
/// longer than `max_delay` ends the loop early: waiting that long is the
/// caller's decision, not ours.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, endpoint: &str, f: F) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let error = match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        attempt += 1;
        if attempt >= max_attempts {
            if max_attempts == 1 {
                return Err(error);
            }
            return Err(ApiError::RetriesExhausted {
                endpoint: endpoint.to_string(),
                attempts: attempt,
                last: Box::new(error),
            });
        }

        let delay = match error.retry_after() {
            Some(hint) if hint > policy.max_delay => return Err(error),
            Some(hint) => hint,
            None => policy.delay_for_attempt(attempt - 1),
        };

        warn!(
            endpoint,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    fn server_error() -> ApiError {
        ApiError::Server {
            endpoint: "/x".into(),
            status: 502,
            detail: "bad gateway".into(),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_policy_from_config() {
        let config = Config {
            max_retries: 2,
            retry_base_delay_ms: 250,
            ..Config::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "/x", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(5), "/x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Unauthorized {
                endpoint: "/x".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(ApiError::Unauthorized { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(3), "/x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(server_error())
        })
        .await;

        match result {
            Err(ApiError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ApiError::Server { .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_is_honoured() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = with_retry(&policy(3), "/x", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::RateLimited {
                    endpoint: "/x".into(),
                    reset_at: None,
                    retry_after: Some(Duration::from_secs(7)),
                })
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_beyond_max_delay_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(5), "/x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::RateLimited {
                endpoint: "/x".into(),
                reset_at: None,
                retry_after: Some(Duration::from_secs(3600)),
            })
        })
        .await;

        assert!(matches!(result, Err(ApiError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
