//! Bounded retry around a [`ContentFetcher`].

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::RepoRef;
use crate::traits::{ContentFetcher, FetchError};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),

    /// `initial`, doubled after each further failure, never above `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay to wait after the `failed_attempt`-th failure (1-based).
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32
                    .checked_shl(failed_attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Retry policy: attempt budget, backoff schedule and which errors qualify.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: fn(&FetchError) -> bool,
}

/// Transport and status failures are retried; cancellation never is.
pub fn default_retryable(error: &FetchError) -> bool {
    !matches!(error, FetchError::Cancelled)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            retryable: default_retryable,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retryable(mut self, retryable: fn(&FetchError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Fetches one file, retrying per [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct FetchRetrier {
    policy: RetryPolicy,
}

impl FetchRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Fetches `file`, returning the complete body or the last error.
    ///
    /// A cancelled `cancel` token ends the call promptly, including while
    /// waiting out a backoff delay.
    pub async fn fetch(
        &self,
        fetcher: &dyn ContentFetcher,
        repo: &RepoRef,
        file: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            debug!(file, attempt, stage = "fetching", "Fetching file");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = fetcher.fetch(repo, file) => result,
            };

            let error = match result {
                Ok(body) => {
                    debug!(
                        file,
                        attempt,
                        bytes = body.len(),
                        stage = "fetched",
                        "Fetched file"
                    );
                    return Ok(body);
                }
                Err(error) => error,
            };

            if attempt >= max_attempts || !(self.policy.retryable)(&error) {
                warn!(file, attempt, error = %error, stage = "fetch_failed", "Giving up on file");
                return Err(error);
            }

            let delay = self.policy.backoff.delay(attempt);
            warn!(
                file,
                attempt,
                max_attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                stage = "retrying",
                "Fetch attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
