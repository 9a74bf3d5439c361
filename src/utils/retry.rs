//! Linear backoff for flaky network backends.
//!
//! Delays start at 0.5s and grow by 1s per attempt up to 7s. The attempt budget
//! defaults to 5 and is overridable through `BB_LKG_RETRIES`.

use crate::constants::{RETRY_DELAY_INCREMENT_MS, RETRY_MAX_DELAY_MS, RETRY_START_DELAY_MS};
use crate::core::LkgError;
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;

/// Delay iterator: 0.5s, 1.5s, 2.5s, ... capped at 7s.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    next_ms: u64,
    increment_ms: u64,
    max_ms: u64,
}

impl LinearBackoff {
    /// The standard schedule.
    #[must_use]
    pub const fn standard() -> Self {
        Self::new(RETRY_START_DELAY_MS, RETRY_DELAY_INCREMENT_MS, RETRY_MAX_DELAY_MS)
    }

    /// Custom schedule, mostly for tests.
    #[must_use]
    pub const fn new(start_ms: u64, increment_ms: u64, max_ms: u64) -> Self {
        Self {
            next_ms: start_ms,
            increment_ms,
            max_ms,
        }
    }
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next_ms.min(self.max_ms);
        self.next_ms = self.next_ms.saturating_add(self.increment_ms);
        Some(Duration::from_millis(current))
    }
}

/// How many times and how long to wait between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub attempts: u32,
    /// Delay schedule between attempts
    pub backoff: LinearBackoff,
}

impl RetryPolicy {
    /// Standard schedule with `attempts` total attempts.
    #[must_use]
    pub const fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: LinearBackoff::standard(),
        }
    }

    /// No waiting between attempts.
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: LinearBackoff::new(0, 0, 0),
        }
    }

    fn delays(&self) -> std::iter::Take<LinearBackoff> {
        self.backoff.clone().take(self.attempts.saturating_sub(1) as usize)
    }

    /// Runs `action` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `action`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut action: F) -> Result<T, LkgError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LkgError>>,
    {
        let mut attempt = 0u32;
        RetryIf::spawn(
            self.delays(),
            || {
                attempt += 1;
                if attempt > 1 {
                    tracing::debug!("Retrying {} (attempt {})", what, attempt);
                }
                action()
            },
            |e: &LkgError| {
                let retry = e.is_retryable();
                if retry {
                    tracing::warn!("{} failed, will retry: {}", what, e);
                }
                retry
            },
        )
        .await
    }
}
