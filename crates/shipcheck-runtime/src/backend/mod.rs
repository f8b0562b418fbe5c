//! Container runtime abstraction.
//!
//! The harness only needs a handful of operations from a runtime: start a
//! container without waiting for it, look at it, read its logs, run
//! commands in it, and tear it and its image down again.

pub mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shipcheck_common::error::Result;
use shipcheck_common::types::{ContainerId, ImageRef};

use crate::command::CommandOutput;

/// Runtime arguments for launching a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeArgs {
    /// Environment variables set in the container.
    pub env: BTreeMap<String, String>,
    /// Extra flags passed to the runtime verbatim.
    pub flags: Vec<String>,
    /// Command overriding the image's default, if any.
    pub command: Vec<String>,
}

impl RuntimeArgs {
    /// Adds a container environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Adds a raw runtime flag.
    #[must_use]
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

/// What the runtime reports about a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime-assigned identifier.
    pub id: ContainerId,
    /// Network address reachable from the harness, if assigned.
    pub address: Option<String>,
    /// Labels attached to the container.
    pub labels: BTreeMap<String, String>,
    /// Runtime status string (`created`, `running`, `exited`, ...).
    pub status: String,
}

/// Platform-agnostic container runtime.
///
/// Implementors wrap a concrete runtime such as the `docker` CLI.
pub trait ContainerRuntime: Send + Sync {
    /// Starts a container named `name` from `image` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the launch cannot be initiated.
    fn start(&self, image: &ImageRef, name: &str, args: &RuntimeArgs) -> Result<()>;

    /// Looks up a container by name or identifier.
    ///
    /// Returns `Ok(None)` while the container is not yet observable.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchFailed`](shipcheck_common::error::HarnessError::LaunchFailed)
    /// if the launch has already failed, or another error if the runtime
    /// cannot be queried.
    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// Returns the combined stdout and stderr log of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    fn logs(&self, id: &ContainerId) -> Result<String>;

    /// Executes a command inside a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be dispatched.
    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<CommandOutput>;

    /// Runs a command in a throwaway container created from `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be run.
    fn run_once(&self, image: &ImageRef, cmd: &[String]) -> Result<CommandOutput>;

    /// Stops a container. Stopping an unknown container succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the container exists but cannot be stopped.
    fn stop(&self, id: &ContainerId) -> Result<()>;

    /// Removes a container. Removing an unknown container succeeds.
    ///
    /// With `force`, a container that is still running is killed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the container exists but cannot be removed.
    fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()>;

    /// Abandons a launch that never became observable.
    ///
    /// Any launch still in flight for `name` is stopped, and a container
    /// created under `name` in the meantime is force-removed. Cancelling a
    /// launch that left nothing behind succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if a container named `name` exists but cannot be removed.
    fn cancel_launch(&self, name: &str) -> Result<()>;

    /// Removes an image. Removing an unknown image succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ImageInUse`](shipcheck_common::error::HarnessError::ImageInUse)
    /// when a container still references the image and `force` is false.
    fn remove_image(&self, image: &ImageRef, force: bool) -> Result<()>;

    /// Returns the content identifier `image` currently resolves to.
    ///
    /// Returns `Ok(None)` if the image is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn image_id(&self, image: &ImageRef) -> Result<Option<String>>;

    /// Returns whether `image` is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn image_exists(&self, image: &ImageRef) -> Result<bool>;
}
