//! Container launch.

use shipcheck_common::error::Result;
use shipcheck_common::types::{self, ImageRef};

use crate::backend::{ContainerRuntime, RuntimeArgs};
use crate::container::ContainerHandle;

/// Starts a container from `image` and returns a `Pending` handle.
///
/// The runtime starts the container in the background. The returned
/// handle has no identifier yet; use the readiness poller to wait for one.
///
/// # Errors
///
/// Returns an error if the runtime refuses to initiate the launch.
pub fn launch(
    runtime: &dyn ContainerRuntime,
    image: &ImageRef,
    args: &RuntimeArgs,
) -> Result<ContainerHandle> {
    let name = types::unique_container_name(image);
    runtime.start(image, &name, args)?;
    tracing::debug!(%image, name = %name, "launch initiated");
    Ok(ContainerHandle::pending(name, image.clone()))
}
