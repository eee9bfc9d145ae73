use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bounded retry policy for transient failures.
///
/// Injected into gateway calls and the orchestrator's push loop so retry
/// behaviour is explicit and testable. Only errors that report
/// [`crate::Error::is_retryable`] are retried; everything else propagates
/// on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base backoff in milliseconds; doubles per attempt.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests and offline paths.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Run `f`, retrying retryable failures up to `max_attempts` total
    /// attempts with doubling backoff.
    pub fn run<T, F>(&self, label: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut backoff = self.backoff_ms;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::warn!(
                        "{}: attempt {}/{} failed ({}), retrying",
                        label,
                        attempt,
                        attempts,
                        e
                    );
                    if backoff > 0 {
                        std::thread::sleep(Duration::from_millis(backoff));
                        backoff = backoff.saturating_mul(2);
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        // Unreachable unless attempts == 0, which max(1) prevents.
        Err(last_err.unwrap_or_else(|| crate::error::Error::git_msg("retry exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn retries_only_retryable() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        };
        let mut calls = 0;
        let out: Result<()> = policy.run("t", || {
            calls += 1;
            Err(Error::unreachable("down"))
        });
        assert!(out.is_err());
        assert_eq!(calls, 3);

        let mut calls = 0;
        let out: Result<()> = policy.run("t", || {
            calls += 1;
            Err(Error::auth_failed("nope"))
        });
        assert!(matches!(out, Err(Error::AuthFailed(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn succeeds_after_transient_failure() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        };
        let mut calls = 0;
        let out = policy.run("t", || {
            calls += 1;
            if calls < 2 {
                Err(Error::unreachable("blip"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls, 2);
    }
}
