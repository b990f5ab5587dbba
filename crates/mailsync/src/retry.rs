//! Classified retry/backoff policy shared by remote calls
//!
//! Metadata and mutation calls go through [`RetryPolicy::execute`], which
//! absorbs rate limiting and transient failures with exponential
//! backoff and propagates everything else untouched. Rate-limited
//! attempts are uncapped (the remote is telling us to slow down, not
//! to stop); transient and network failures give up after
//! `max_retries` and surface the last error.

use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Tuning for [`RetryPolicy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Retries allowed for transient-server and network failures
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 5,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// How to respond to one classified failure
enum Decision {
    RateLimit(Option<Duration>),
    Backoff,
    Fail,
}

/// Executes idempotent remote operations with classified retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds or its failure class says to stop.
    ///
    /// Backoff starts at the configured initial delay and doubles each
    /// attempt up to the ceiling. The first rate-limit detection
    /// doubles the delay once immediately, before the standard
    /// doubling sequence. After `max_retries` non-rate-limited
    /// failures the last error is returned to the caller.
    pub fn execute<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let cap = self.config.max_delay();
        let mut delay = self.config.initial_delay().min(cap);
        let mut failures = 0u32;
        let mut attempts = 0u32;
        let mut rate_limited = false;

        loop {
            attempts += 1;
            let err = match op() {
                Ok(value) => {
                    if attempts > 1 {
                        debug!("{operation}: succeeded after {attempts} attempts");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let decision = match SyncError::classify(&err) {
                Some(SyncError::RateLimited { retry_after }) => Decision::RateLimit(*retry_after),
                Some(class) if class.is_retriable() => Decision::Backoff,
                _ => Decision::Fail,
            };

            match decision {
                Decision::RateLimit(retry_after) => {
                    if !rate_limited {
                        rate_limited = true;
                        delay = (delay * 2).min(cap);
                    }
                    let wait = retry_after.filter(|ra| *ra > delay).unwrap_or(delay);
                    warn!(
                        "{operation}: rate limited, waiting {}ms (attempt {attempts})",
                        wait.as_millis()
                    );
                    std::thread::sleep(wait);
                    delay = (delay * 2).min(cap);
                }
                Decision::Backoff => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        warn!("{operation}: giving up after {failures} transient failures");
                        return Err(err);
                    }
                    warn!(
                        "{operation}: transient failure ({err:#}), retrying in {}ms",
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(cap);
                }
                Decision::Fail => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 4,
            max_retries,
        })
    }

    #[test]
    fn test_auth_expired_fails_without_retry() {
        let calls = Cell::new(0u32);
        let result: Result<()> = fast_policy(5).execute("op", || {
            calls.set(calls.get() + 1);
            Err(SyncError::AuthExpired.into())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_malformed_fails_without_retry() {
        let calls = Cell::new(0u32);
        let result: Result<()> = fast_policy(5).execute("op", || {
            calls.set(calls.get() + 1);
            Err(SyncError::Malformed("truncated body".into()).into())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_rate_limits_are_uncapped() {
        // More consecutive 429s than max_retries still ends in success.
        let calls = Cell::new(0u32);
        let result = fast_policy(1).execute("op", || {
            calls.set(calls.get() + 1);
            if calls.get() <= 4 {
                Err(SyncError::RateLimited { retry_after: None }.into())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_transient_failures_respect_cap() {
        let calls = Cell::new(0u32);
        let result: Result<()> = fast_policy(2).execute("op", || {
            calls.set(calls.get() + 1);
            Err(SyncError::TransientServer { status: 503 }.into())
        });
        let err = result.unwrap_err();
        assert!(matches!(
            SyncError::classify(&err),
            Some(SyncError::TransientServer { status: 503 })
        ));
        // Initial attempt plus two retries.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_network_timeout_recovers_within_cap() {
        let calls = Cell::new(0u32);
        let result = fast_policy(3).execute("op", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SyncError::NetworkTimeout("connection reset".into()).into())
            } else {
                Ok("profile")
            }
        });
        assert_eq!(result.unwrap(), "profile");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_unclassified_error_fails_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<()> = fast_policy(5).execute("op", || {
            calls.set(calls.get() + 1);
            Err(anyhow::anyhow!("store unavailable"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
