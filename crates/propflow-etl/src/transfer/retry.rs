//! Retry with exponential backoff
//!
//! Each attempt reports an [`AttemptOutcome`]; [`RetryPolicy::run`] decides
//! whether to try again. The delay after failed attempt `n` (zero-based) is
//! `base_delay * 2^n`, capped at `max_delay`. Waiting observes the
//! cancellation token.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{TransferError, UploadError};

/// Result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    Success(T),
    /// Failed, another attempt may succeed
    Retryable(E),
    /// Failed, stop retrying
    Fatal(E),
}

impl<T> AttemptOutcome<T, TransferError> {
    /// Classify a transfer result by [`TransferError::is_retryable`]
    pub fn from_transfer(result: Result<T, TransferError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(e) if e.is_retryable() => AttemptOutcome::Retryable(e),
            Err(e) => AttemptOutcome::Fatal(e),
        }
    }
}

/// Errors that can report an interrupted wait
pub trait Interrupted {
    fn interrupted() -> Self;
}

impl Interrupted for TransferError {
    fn interrupted() -> Self {
        TransferError::Cancelled
    }
}

impl Interrupted for UploadError {
    fn interrupted() -> Self {
        UploadError::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff after the zero-based failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally or attempts run out
    ///
    /// `op` receives the zero-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        E: Interrupted + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(E::interrupted());
            }

            match op(attempt).await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Fatal(e) => return Err(e),
                AttemptOutcome::Retryable(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );

                    if attempt + 1 >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    info!("Retrying {} in {:?}", label, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(E::interrupted()),
                        _ = tokio::time::sleep(delay) => {},
                    }
                    attempt += 1;
                },
            }
        }
    }
}
