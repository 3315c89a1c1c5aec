//! Generic retry execution.
//!
//! A retry behavior is a named [`RetryPolicy`] — attempt budget plus a
//! [`Backoff`] schedule — applied by one executor, [`RetryPolicy::run`].
//! The embedding client retries warm-up signals on a fixed schedule;
//! answer-generation clients can reuse the same primitive with an
//! exponential schedule for provider overload.

use std::future::Future;
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, cap } => {
                let factor = 1u32 << (attempt - 1).min(16);
                (*base * factor).min(*cap)
            }
        }
    }
}

/// A named retry behavior: how many attempts, and how long to wait
/// between them. Which errors are worth retrying is supplied per call
/// site, since it depends on the error type.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or the
    /// attempt budget is exhausted. The last error is returned as-is.
    pub async fn run<T, E, F, Fut>(&self, is_retryable: impl Fn(&E) -> bool, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts || !is_retryable(&err) {
                        return Err(err);
                    }
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
