//! Bounded retry of a fallible async operation.
//!
//! Used for backend connects: every failure is retryable and the attempt
//! budget is fixed. The delay between attempts comes from `backoff.rs` and is
//! zero unless a base delay is configured.

use std::future::Future;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Retry immediately, up to `max_attempts` attempts in total.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(last_error) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error,
                });
            }
            Err(_) => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
