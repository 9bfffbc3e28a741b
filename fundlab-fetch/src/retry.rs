//! Retry policy for transient fetch failures.
//!
//! Transient failures (rate limiting, network unreachability) are retried
//! indefinitely with a fixed delay between attempts. Permanent failures
//! are returned to the caller on the first occurrence. The retry loop is
//! invisible to callers: an operation that eventually succeeds is
//! indistinguishable from one that succeeded immediately.

use std::time::Duration;

use crate::provider::FetchError;

/// Fixed-delay retry policy applied around each entity fetch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Duration) -> Self {
        RetryPolicy { backoff }
    }

    /// Run `op` until it succeeds or fails permanently. Transient errors
    /// sleep for the backoff and try again, with no attempt cap.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, FetchError>,
    {
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    std::thread::sleep(self.delay_for(&err));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Delay before the next attempt. A rate-limit response may carry the
    /// server's Retry-After hint; honor it when it exceeds the fixed
    /// backoff, never sleep less than the backoff.
    fn delay_for(&self, err: &FetchError) -> Duration {
        match err {
            FetchError::RateLimited { retry_after_secs } => {
                self.backoff.max(Duration::from_secs(*retry_after_secs))
            }
            _ => self.backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn success_passes_through() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let result = policy.run(|| Ok::<_, FetchError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn transient_failures_are_absorbed() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let attempts = Cell::new(0);
        let result = policy.run(|| {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 4 {
                Err(FetchError::RateLimited { retry_after_secs: 0 })
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn retry_after_hint_extends_the_backoff() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        assert_eq!(
            policy.delay_for(&FetchError::RateLimited { retry_after_secs: 25 }),
            Duration::from_secs(25)
        );
        // A hint shorter than the backoff never shortens the wait.
        assert_eq!(
            policy.delay_for(&FetchError::RateLimited { retry_after_secs: 1 }),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.delay_for(&FetchError::NetworkUnreachable("dns".into())),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn permanent_failure_returns_immediately() {
        let policy = RetryPolicy::new(Duration::from_millis(1));
        let attempts = Cell::new(0);
        let result: Result<(), _> = policy.run(|| {
            attempts.set(attempts.get() + 1);
            Err(FetchError::SymbolNotFound { symbol: "XXX".into() })
        });
        assert!(matches!(result, Err(FetchError::SymbolNotFound { .. })));
        assert_eq!(attempts.get(), 1);
    }
}
