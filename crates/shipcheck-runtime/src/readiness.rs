//! Readiness polling for launched containers.
//!
//! The harness has no access to a container's own readiness signal, so it
//! polls the runtime on a fixed wall-clock interval until the handle's
//! identity is observable or the attempt budget runs out.

use std::time::Duration;

use shipcheck_common::config::RetryPolicy;
use shipcheck_common::error::HarnessError;
use thiserror::Error;

use crate::backend::ContainerRuntime;
use crate::container::ContainerHandle;
use crate::retry::{self, Attempt, RetryError};

/// What must be observable before a handle counts as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Requirement {
    /// A runtime identifier is enough.
    Identifier,
    /// An identifier and a network address are required.
    Address,
}

/// Why a container never became ready.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The attempt budget was exhausted.
    #[error("container not ready after {attempts} attempts ({elapsed:?}): {last}")]
    Timeout {
        /// Attempts made.
        attempts: u32,
        /// Wall-clock time spent.
        elapsed: Duration,
        /// Last observed reason.
        last: String,
    },
    /// The launch failed or the container died before becoming reachable.
    #[error("launch failed: {message}")]
    LaunchFailed {
        /// Diagnostic message.
        message: String,
    },
    /// The runtime itself became unusable.
    #[error(transparent)]
    Fatal(HarnessError),
}

/// Polls a runtime until a handle becomes ready.
pub struct ReadinessPoller<'a> {
    runtime: &'a dyn ContainerRuntime,
    policy: RetryPolicy,
}

impl<'a> ReadinessPoller<'a> {
    /// Creates a poller with the given attempt budget.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime, policy: RetryPolicy) -> Self {
        Self { runtime, policy }
    }

    /// Blocks until `handle` satisfies `requirement`, then marks it running.
    ///
    /// Returns the number of attempts it took. On failure the handle
    /// stays `Pending`, though any identifier seen is kept for cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] on timeout, launch failure, or a fatal
    /// runtime error.
    pub fn await_ready(
        &self,
        handle: &mut ContainerHandle,
        requirement: Requirement,
    ) -> Result<u32, ReadinessError> {
        let runtime = self.runtime;
        let result = retry::retry(self.policy, |_| poll_once(runtime, handle, requirement));

        match result {
            Ok(retried) => {
                let _ = handle.mark_running();
                tracing::info!(
                    name = handle.name(),
                    id = ?handle.id().map(|id| id.short().to_string()),
                    address = ?handle.address(),
                    attempts = retried.attempts,
                    "container ready"
                );
                Ok(retried.attempts)
            }
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            }) => {
                tracing::warn!(name = handle.name(), attempts, ?elapsed, "readiness timeout");
                Err(ReadinessError::Timeout {
                    attempts,
                    elapsed,
                    last,
                })
            }
            Err(RetryError::Aborted { error, .. }) => Err(error),
        }
    }
}

fn poll_once(
    runtime: &dyn ContainerRuntime,
    handle: &mut ContainerHandle,
    requirement: Requirement,
) -> Attempt<(), ReadinessError> {
    let info = match runtime.inspect(handle.name()) {
        Ok(Some(info)) => info,
        Ok(None) => return Attempt::Retry("container not yet observable".into()),
        Err(HarnessError::LaunchFailed { message, .. }) => {
            return Attempt::Abort(ReadinessError::LaunchFailed { message });
        }
        Err(e) if e.is_fatal() => return Attempt::Abort(ReadinessError::Fatal(e)),
        Err(e) => return Attempt::Retry(e.to_string()),
    };
    handle.observe(&info);

    match requirement {
        Requirement::Identifier => Attempt::Ready(()),
        Requirement::Address if info.address.is_some() => Attempt::Ready(()),
        Requirement::Address if matches!(info.status.as_str(), "exited" | "dead") => {
            Attempt::Abort(ReadinessError::LaunchFailed {
                message: format!("container {} {} before getting an address", info.id.short(), info.status),
            })
        }
        Requirement::Address => Attempt::Retry(format!("no address yet (status {})", info.status)),
    }
}
