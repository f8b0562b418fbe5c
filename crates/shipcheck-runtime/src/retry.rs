//! Bounded fixed-interval retry.
//!
//! Shared by the readiness poller and the HTTP probe. Every call ends
//! after at most `max_attempts` attempts, sleeping `interval` between
//! attempts and never after the last one.

use std::time::{Duration, Instant};

use shipcheck_common::config::RetryPolicy;
use thiserror::Error;

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The action succeeded; stop immediately.
    Ready(T),
    /// Not yet; try again after the interval. Carries the reason.
    Retry(String),
    /// A failure retrying cannot fix; stop immediately.
    Abort(E),
}

/// Successful retry result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// Value produced by the successful attempt.
    pub value: T,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

/// Why a retry loop ended without a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The attempt budget ran out.
    #[error("gave up after {attempts} attempts ({elapsed:?}): {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Wall-clock time spent.
        elapsed: Duration,
        /// Reason reported by the final attempt.
        last: String,
    },
    /// An attempt reported an unrecoverable failure.
    #[error("aborted after {attempts} attempts: {error}")]
    Aborted {
        /// Attempts made, including the aborting one.
        attempts: u32,
        /// The failure.
        error: E,
    },
}

/// Runs `action` until it is ready, aborts, or the budget is spent.
///
/// `action` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] when every attempt asked to retry, or
/// [`RetryError::Aborted`] when an attempt aborted.
pub fn retry<T, E, F>(policy: RetryPolicy, mut action: F) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    let start = Instant::now();
    let mut last = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        match action(attempt) {
            Attempt::Ready(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Attempt::Abort(error) => {
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }
            Attempt::Retry(reason) => {
                tracing::debug!(attempt, max = policy.max_attempts, %reason, "attempt not ready");
                last = reason;
            }
        }
        if attempt < policy.max_attempts {
            std::thread::sleep(policy.interval);
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        elapsed: start.elapsed(),
        last,
    })
}
