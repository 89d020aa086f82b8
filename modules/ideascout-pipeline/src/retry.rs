//! Bounded exponential backoff around one fallible call.
//!
//! Transient failures (timeouts, 5xx, rate limits) are retried after
//! `min(2^attempt, cap)` backoff units. Permanent failures return at once so
//! the caller can fall back on the same attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use ai_client::AiError;
use tracing::{debug, warn};

use ideascout_common::file_config::RetryConfig;

use crate::traits::SourceError;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for AiError {
    fn is_transient(&self) -> bool {
        AiError::is_transient(self)
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
    max_backoff_units: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, unit: Duration, max_backoff_units: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            unit,
            max_backoff_units,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs_f64(config.backoff_unit_secs.max(0.0)),
            config.max_backoff_secs,
        )
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, 30)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let units = 2u64
            .checked_pow(attempt)
            .unwrap_or(u64::MAX)
            .min(self.max_backoff_units);
        self.unit.saturating_mul(units.min(u32::MAX as u64) as u32)
    }

    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    debug!(call = label, attempt, error = %e, "Permanent failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(call = label, attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.backoff(attempt);
                    warn!(
                        call = label,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), 30);
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(5), Duration::from_secs(30));
        assert_eq!(policy.backoff(64), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<&str, AiError> = RetryPolicy::immediate(3)
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AiError::Timeout("slow".into()))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_on_first_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AiError> = RetryPolicy::immediate(5)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::from_status(401, "bad key"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AiError> = RetryPolicy::immediate(2)
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AiError::from_status(503, "overloaded"))
            })
            .await;
        assert!(matches!(result, Err(AiError::Server { status: 503, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
