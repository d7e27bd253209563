//! Fixed-delay retry shared by part uploads and completion.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{ConfigurationError, TransportError};

/// Default number of attempts for each part.
pub const DEFAULT_PART_MAX_TRIES: u32 = 5;
pub const DEFAULT_PART_RETRY_DELAY_MS: u64 = 2000;
/// Default delay between attempts of a part.
pub const DEFAULT_PART_RETRY_DELAY: Duration = Duration::from_millis(DEFAULT_PART_RETRY_DELAY_MS);
/// Default number of attempts for the completion call.
pub const DEFAULT_COMPLETE_MAX_TRIES: u32 = 3;
pub const DEFAULT_COMPLETE_RETRY_DELAY_MS: u64 = 1000;
/// Default delay between attempts of the completion call.
pub const DEFAULT_COMPLETE_RETRY_DELAY: Duration =
    Duration::from_millis(DEFAULT_COMPLETE_RETRY_DELAY_MS);

/// How many times to attempt a call, and how long to wait in between.
///
/// The delay is fixed; there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_tries: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    /// `what` names the call in the error when `max_tries` is 0.
    pub fn new(
        what: &'static str,
        max_tries: u32,
        retry_delay: Duration,
    ) -> Result<Self, ConfigurationError> {
        if max_tries == 0 {
            return Err(ConfigurationError::ZeroTries(what));
        }
        Ok(Self {
            max_tries,
            retry_delay,
        })
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Why a retried call gave up.
#[derive(Debug)]
pub(crate) enum RetryError {
    /// The last error, and how many attempts were made.
    Failed {
        attempts: u32,
        source: TransportError,
    },
    /// Cancellation was requested while waiting to retry.
    Cancelled,
}

/// Run `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// `op` receives the 1-based attempt number. Fatal errors are returned
/// straight away without waiting.
pub(crate) async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 1;
    loop {
        let source = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if source.is_fatal() || attempt >= policy.max_tries {
            return Err(RetryError::Failed {
                attempts: attempt,
                source,
            });
        }

        warn!(
            attempt,
            max_tries = policy.max_tries,
            error = %source,
            "Attempt failed, retrying in {:?}",
            policy.retry_delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(policy.retry_delay) => {}
        }
        attempt += 1;
    }
}
