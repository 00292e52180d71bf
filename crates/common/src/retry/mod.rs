//! Bounded retry driver with exponential backoff.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::*;

pub mod policies;

use policies::ExponentialBackoff;

/// Outcome of a retry operation that did not finish successfully.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation returned an error, which ends the retry loop.
    #[error("terminal error: {0}")]
    Terminal(E),

    /// The overall deadline elapsed before the operation reported completion.
    #[error("retry timed out after {elapsed:?} ({attempts} attempts)")]
    Timeout { elapsed: Duration, attempts: u32 },

    /// The caller cancelled the operation.
    #[error("retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the terminal error, if that is why the loop stopped.
    pub fn into_terminal(self) -> Option<E> {
        match self {
            RetryError::Terminal(e) => Some(e),
            _ => None,
        }
    }
}

/// Repeatedly invokes `f` until it reports completion.
///
/// Each invocation is bounded by the policy's per-call timeout; an invocation that hits it
/// counts as an unfinished attempt. `Ok(true)` ends the loop successfully, `Ok(false)` sleeps
/// for [`ExponentialBackoff::compute_backoff`] and tries again, and `Err` ends the loop
/// immediately without sleeping. The whole operation is bounded by `overall_timeout` and can
/// be aborted through `cancel`.
pub async fn retry_with_timeout<F, Fut, E>(
    cancel: &CancellationToken,
    overall_timeout: Duration,
    policy: &ExponentialBackoff,
    mut f: F,
) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = tokio::time::Instant::now();
    let deadline = start + overall_timeout;
    let attempts = AtomicU32::new(0);

    let run = async {
        loop {
            let outcome = tokio::time::timeout(policy.call_timeout(), f()).await;
            match outcome {
                Ok(Ok(true)) => return Ok(()),
                Ok(Err(e)) => return Err(RetryError::Terminal(e)),
                Ok(Ok(false)) => {}
                Err(_) => {
                    debug!(
                        attempt = attempts.load(Ordering::Relaxed),
                        "retry attempt hit per-call timeout"
                    );
                }
            }

            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let delay = policy.compute_backoff(attempt);
            trace!(attempt, ?delay, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetryError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => {
            let elapsed = start.elapsed();
            let attempts = attempts.load(Ordering::Relaxed);
            warn!(?elapsed, attempts, "retry deadline exceeded");
            Err(RetryError::Timeout { elapsed, attempts })
        }
        res = run => res,
    }
}
