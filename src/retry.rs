//! Retry logic with exponential backoff
//!
//! This module provides configurable retry logic for transient scan failures.
//! It implements exponential backoff with optional jitter to prevent thundering herd,
//! and every backoff sleep is cut short by cancellation.
//!
//! # Example
//!
//! ```no_run
//! use flatfile_dl::retry::{IsRetryable, download_with_retry};
//! use flatfile_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let result = download_with_retry(&config, &cancel, |_attempt| async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection reset, database failover) should return `true`.
/// Permanent failures (bad query, corrupt data, integrity violations) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transient { .. } => true,
            // Permanent source failures need operator action
            DownloadError::Source { .. } => false,
            // Retrying would fail on the same document again
            DownloadError::Conversion { .. } => false,
            // Already the outcome of a retry loop
            DownloadError::Failed { .. } => false,
            DownloadError::Interrupted { .. } => false,
        }
    }
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Download(e) => e.is_retryable(),
            // I/O errors can be retryable in some cases
            Error::Io(e) => is_transient_io(e),
            // Corrupt data stays corrupt
            Error::Codec(_) => false,
            // Defect class, surfaced immediately
            Error::MergeIntegrity { .. } => false,
            Error::Config { .. } | Error::InvalidRange { .. } => false,
            Error::Incomplete { .. } | Error::Cancelled => false,
            Error::Serialization(_) => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Execute an async operation with exponential backoff retry logic
///
/// `operation` receives the zero-based attempt number, so it can rebuild its
/// input from whatever progress the previous attempt made.
///
/// # Returns
///
/// Returns the successful result, or the last error once retries are exhausted,
/// the error is not retryable, or `cancel` fires during a backoff sleep. Callers
/// tell the last case apart with [`CancellationToken::is_cancelled`].
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(error = %e, "Retry abandoned: cancelled during backoff");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(jittered_delay) => {}
                }

                // Calculate next delay with exponential backoff
                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay,
/// so the actual delay is between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
