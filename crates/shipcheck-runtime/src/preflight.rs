//! Prerequisite checks run before any scenario.
//!
//! Anything missing here is fatal: the run stops before a single
//! resource has been created, so there is nothing to clean up.

use std::path::PathBuf;

use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::ImageRef;

use crate::backend::ContainerRuntime;

/// Locates `binary` on `PATH`.
///
/// # Errors
///
/// Returns [`HarnessError::FatalSetup`] if the binary cannot be found.
pub fn require_tool(binary: &str) -> Result<PathBuf> {
    which::which(binary).map_err(|_| HarnessError::FatalSetup {
        message: format!("required tool `{binary}` not found on PATH"),
    })
}

/// Verifies that the image under test is available locally.
///
/// # Errors
///
/// Returns [`HarnessError::FatalSetup`] if the image is absent or the
/// runtime cannot be asked.
pub fn require_image(runtime: &dyn ContainerRuntime, image: &ImageRef) -> Result<()> {
    match runtime.image_exists(image) {
        Ok(true) => {
            tracing::info!(%image, "image under test present");
            Ok(())
        }
        Ok(false) => Err(HarnessError::FatalSetup {
            message: format!("image under test {image} does not exist locally"),
        }),
        Err(e) => Err(HarnessError::FatalSetup {
            message: format!("cannot query image {image}: {e}"),
        }),
    }
}
