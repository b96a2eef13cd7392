//! Retry mechanism with capped linear backoff
//!
//! Implements retry logic for transient failures: connection errors, 5xx
//! responses, and refused (expired) auth tokens. The n-th retry waits
//! `n * initial_backoff_ms`, capped at `max_backoff_ms`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::alias::RetryConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::token::{Endpoint, TokenCache};

/// Retry a fallible async operation with backoff
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation` - Async closure that returns `Result<T>`
/// * `is_retryable` - Closure that determines if an error should trigger retry
///
/// Gives up with the error itself when it is not retryable, and with
/// [`Error::CapacityExhausted`] once `max_attempts` is reached.
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(
///     &config,
///     || async { auth.try_v1().await },
///     |e| e.is_retryable(),
/// ).await;
/// ```
pub async fn retry_with_backoff<T, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }
                if attempt >= max_attempts {
                    return Err(exhausted(attempt, e));
                }

                let backoff = calculate_backoff(config, attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying after transient error"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Calculate backoff before retry number `attempt` (1-based)
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(u64::from(attempt))
        .min(config.max_backoff_ms);
    Duration::from_millis(ms)
}

fn exhausted(attempts: u32, last: Error) -> Error {
    Error::CapacityExhausted {
        attempts,
        last: Box::new(last),
    }
}

/// Check if an error is retryable (transient)
pub fn is_retryable_error(error: &Error) -> bool {
    error.is_retryable()
}

/// Retries storage operations, re-authenticating when a token is refused
///
/// Each attempt is handed the current [`Endpoint`]. When an attempt fails
/// with [`Error::AuthExpired`], exactly that endpoint is invalidated in the
/// shared [`TokenCache`] and the next attempt starts without waiting, picking
/// up a fresh token. Operations must be safe to repeat; the policy performs
/// no deduplication.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    tokens: Arc<TokenCache>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, tokens: Arc<TokenCache>) -> Self {
        Self { config, tokens }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Run `operation` until it succeeds, fails terminally, or exhausts retries
    ///
    /// A rejected re-authentication ([`Error::Auth`]) ends the loop at once.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let endpoint = self.tokens.current().await?;

            let e = match operation(endpoint.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let auth_expired = e.kind() == ErrorKind::AuthExpired;
            if auth_expired {
                self.tokens.invalidate_token(&endpoint);
            }
            if !e.is_retryable() {
                return Err(e);
            }
            if attempt >= max_attempts {
                return Err(exhausted(attempt, e));
            }

            if auth_expired {
                tracing::debug!(attempt = attempt, error = %e, "Retrying with a fresh token");
                continue;
            }

            let backoff = calculate_backoff(&self.config, attempt);
            tracing::debug!(
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "Retrying after transient error"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Retry configuration builder for easy customization
#[derive(Debug, Clone)]
pub struct RetryBuilder {
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetryBuilder {
    pub fn new() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: defaults.initial_backoff_ms,
            max_backoff_ms: defaults.max_backoff_ms,
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set attempts from a retry count, as the CLI's `--retries` does
    pub fn retries(mut self, n: u32) -> Self {
        self.max_attempts = n.saturating_add(1);
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
