//! The harness's owned reference to a launched container.

use serde::{Deserialize, Serialize};
use shipcheck_common::types::{ContainerId, HandleStatus, ImageRef};

use crate::backend::ContainerInfo;

/// A launched container tracked through its lifecycle.
///
/// The identifier, once observed, never changes. The address is only
/// meaningful while the handle is [`HandleStatus::Running`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    name: String,
    image: ImageRef,
    id: Option<ContainerId>,
    address: Option<String>,
    status: HandleStatus,
}

impl ContainerHandle {
    /// Creates a handle for a launch that has been requested.
    #[must_use]
    pub fn pending(name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            name: name.into(),
            image,
            id: None,
            address: None,
            status: HandleStatus::Pending,
        }
    }

    /// Name the container was launched under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image the container was launched from.
    #[must_use]
    pub const fn image(&self) -> &ImageRef {
        &self.image
    }

    /// Identifier, if one has been observed.
    #[must_use]
    pub const fn id(&self) -> Option<&ContainerId> {
        self.id.as_ref()
    }

    /// Network address, only while running.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self.status {
            HandleStatus::Running => self.address.as_deref(),
            _ => None,
        }
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> HandleStatus {
        self.status
    }

    /// Records what the runtime reported without changing status.
    ///
    /// A different identifier than the one already observed is ignored.
    pub fn observe(&mut self, info: &ContainerInfo) {
        match &self.id {
            Some(existing) if *existing != info.id => {
                tracing::warn!(
                    name = %self.name,
                    observed = %info.id,
                    kept = %existing,
                    "runtime reported a different identifier, keeping the first"
                );
            }
            Some(_) => {}
            None => self.id = Some(info.id.clone()),
        }
        if info.address.is_some() {
            self.address.clone_from(&info.address);
        }
    }

    /// Transitions `Pending -> Running`. Requires an observed identifier.
    pub fn mark_running(&mut self) -> bool {
        if self.status == HandleStatus::Pending && self.id.is_some() {
            self.status = HandleStatus::Running;
            return true;
        }
        false
    }

    /// Transitions to `Stopped` unless already removed.
    pub fn mark_stopped(&mut self) {
        if self.status != HandleStatus::Removed {
            self.status = HandleStatus::Stopped;
        }
    }

    /// Transitions to `Removed`.
    pub fn mark_removed(&mut self) {
        self.status = HandleStatus::Removed;
    }
}
