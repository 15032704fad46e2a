use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::RetrySection;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetrySection::default().into()
    }
}

impl From<RetrySection> for RetryOptions {
    fn from(section: RetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            backoff: Duration::from_millis(section.backoff_ms),
            backoff_multiplier: section.backoff_multiplier.max(1.0),
        }
    }
}

impl RetryOptions {
    pub fn new(max_retries: u32, backoff: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            backoff,
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    /// Total number of calls, never below one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.backoff
            .mul_f64(self.backoff_multiplier.powi(exponent))
    }
}

/// Calls `operation` until it succeeds or the attempt budget is spent.
/// `on_retry` runs after each backoff sleep, just before the next call.
pub async fn retry<T, E, F, Fut, R>(options: &RetryOptions, on_retry: R, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E),
    E: std::fmt::Display,
{
    retry_if(options, |_: &E| true, on_retry, operation).await
}

/// Like [`retry`], but stops early when `should_retry` rejects the error.
/// The final error is returned unchanged.
pub async fn retry_if<T, E, F, Fut, P, R>(
    options: &RetryOptions,
    mut should_retry: P,
    mut on_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    R: FnMut(u32, &E),
    E: std::fmt::Display,
{
    let max_attempts = options.max_attempts();
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }
                let delay = options.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed; retrying"
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                on_retry(attempt, &error);
                attempt += 1;
            }
        }
    }
}
