//! Teardown of containers and images created by a scenario.
//!
//! Cleanup is best-effort and idempotent: handles already removed are
//! skipped, launches that never produced an identifier are cancelled by
//! name, and failures are collected into a [`CleanupReport`] instead of
//! returned. Containers are always removed before the images they were
//! started from.

use serde::{Deserialize, Serialize};
use shipcheck_common::error::HarnessError;
use shipcheck_common::types::{HandleStatus, ImageRef};

use crate::backend::ContainerRuntime;
use crate::container::ContainerHandle;

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Identifiers of containers removed in this pass.
    pub containers_removed: Vec<String>,
    /// Names of launches cancelled before a container was observed.
    pub launches_cancelled: Vec<String>,
    /// Images removed in this pass.
    pub images_removed: Vec<String>,
    /// Images that needed forced removal.
    pub images_forced: Vec<String>,
    /// Failures, for diagnostics only.
    pub errors: Vec<String>,
}

impl CleanupReport {
    /// Returns whether the pass finished without errors.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Stops and removes containers, then removes images.
pub struct CleanupManager<'a> {
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> CleanupManager<'a> {
    /// Creates a manager operating on `runtime`.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Tears down `handles`, then removes every image left in `images`.
    ///
    /// Removed images are drained from `images`, so calling this again
    /// only retries what failed.
    pub fn cleanup(&self, handles: &mut [ContainerHandle], images: &mut Vec<ImageRef>) -> CleanupReport {
        let mut report = CleanupReport::default();
        for handle in handles.iter_mut() {
            self.teardown_container(handle, &mut report);
        }

        let mut remaining = Vec::new();
        for image in images.drain(..) {
            if self.remove_image(&image, &mut report) {
                report.images_removed.push(image.to_string());
            } else {
                remaining.push(image);
            }
        }
        *images = remaining;

        if report.is_clean() {
            tracing::debug!(
                containers = report.containers_removed.len(),
                images = report.images_removed.len(),
                "cleanup complete"
            );
        } else {
            tracing::warn!(errors = ?report.errors, "cleanup finished with errors");
        }
        report
    }

    fn teardown_container(&self, handle: &mut ContainerHandle, report: &mut CleanupReport) {
        if handle.status() == HandleStatus::Removed {
            return;
        }
        if handle.id().is_none() {
            // Late launches may have produced a container after readiness gave up.
            if let Ok(Some(info)) = self.runtime.inspect(handle.name()) {
                handle.observe(&info);
            }
        }
        let Some(id) = handle.id().cloned() else {
            self.cancel_launch(handle, report);
            return;
        };

        let mut force = false;
        if handle.status() != HandleStatus::Stopped {
            match self.runtime.stop(&id) {
                Ok(()) => handle.mark_stopped(),
                Err(e) => {
                    report.errors.push(format!("stop {}: {e}", id.short()));
                    force = true;
                }
            }
        }
        match self.runtime.remove_container(&id, force) {
            Ok(()) => {
                handle.mark_removed();
                tracing::info!(id = %id.short(), "container removed");
                report.containers_removed.push(id.to_string());
            }
            Err(e) => report.errors.push(format!("rm {}: {e}", id.short())),
        }
    }

    fn cancel_launch(&self, handle: &mut ContainerHandle, report: &mut CleanupReport) {
        let name = handle.name().to_string();
        match self.runtime.cancel_launch(&name) {
            Ok(()) => {
                handle.mark_removed();
                tracing::info!(name = %name, "launch cancelled");
                report.launches_cancelled.push(name);
            }
            Err(e) => report.errors.push(format!("cancel {name}: {e}")),
        }
    }

    fn remove_image(&self, image: &ImageRef, report: &mut CleanupReport) -> bool {
        match self.runtime.remove_image(image, false) {
            Ok(()) => {
                tracing::info!(%image, "image removed");
                true
            }
            Err(HarnessError::ImageInUse { .. }) => {
                tracing::warn!(%image, "image still referenced, forcing removal");
                match self.runtime.remove_image(image, true) {
                    Ok(()) => {
                        report.images_forced.push(image.to_string());
                        true
                    }
                    Err(e) => {
                        report.errors.push(format!("rmi -f {image}: {e}"));
                        false
                    }
                }
            }
            Err(e) => {
                report.errors.push(format!("rmi {image}: {e}"));
                false
            }
        }
    }
}

/// Resources acquired by one scenario, released exactly once.
///
/// [`release`](Self::release) runs cleanup explicitly. If the guard is
/// dropped without being released, because of an early return or an
/// unwinding panic, cleanup runs from `Drop` instead.
pub struct ScenarioResources<'a> {
    runtime: &'a dyn ContainerRuntime,
    handle: Option<ContainerHandle>,
    images: Vec<ImageRef>,
    released: bool,
}

/// Result of releasing a scenario's resources.
#[derive(Debug)]
pub struct Released {
    /// The container handle, if one was launched.
    pub handle: Option<ContainerHandle>,
    /// What cleanup did.
    pub report: CleanupReport,
}

impl<'a> ScenarioResources<'a> {
    /// Creates an empty guard.
    #[must_use]
    pub fn new(runtime: &'a dyn ContainerRuntime) -> Self {
        Self {
            runtime,
            handle: None,
            images: Vec::new(),
            released: false,
        }
    }

    /// Takes ownership of an image the scenario produced.
    pub fn track_image(&mut self, image: ImageRef) {
        if !self.images.contains(&image) {
            self.images.push(image);
        }
    }

    /// Takes ownership of the scenario's container handle.
    ///
    /// Returns a mutable reference to the stored handle.
    pub fn adopt(&mut self, handle: ContainerHandle) -> &mut ContainerHandle {
        self.handle.insert(handle)
    }

    /// Returns the owned handle, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Returns the owned handle mutably, if any.
    pub fn handle_mut(&mut self) -> Option<&mut ContainerHandle> {
        self.handle.as_mut()
    }

    /// Runs cleanup and hands back the final handle state.
    #[must_use]
    pub fn release(mut self) -> Released {
        let report = self.run_cleanup();
        Released {
            handle: self.handle.take(),
            report,
        }
    }

    fn run_cleanup(&mut self) -> CleanupReport {
        self.released = true;
        let manager = CleanupManager::new(self.runtime);
        let handles: &mut [ContainerHandle] = match self.handle.as_mut() {
            Some(handle) => std::slice::from_mut(handle),
            None => &mut [],
        };
        manager.cleanup(handles, &mut self.images)
    }
}

impl Drop for ScenarioResources<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("scenario ended abnormally, cleaning up");
            let _ = self.run_cleanup();
        }
    }
}
