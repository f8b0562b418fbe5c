//! Unified error types for the shipcheck workspace.
//!
//! Only conditions that abort an operation are errors. Build failures,
//! timeouts, and assertion mismatches are reported as values by the
//! crates that produce them.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A prerequisite for the whole run is missing.
    #[error("fatal setup error: {message}")]
    FatalSetup {
        /// Description of the missing prerequisite.
        message: String,
    },

    /// An external tool could not be located or started.
    #[error("external tool `{tool}` unavailable: {source}")]
    ToolUnavailable {
        /// Program that failed to start.
        tool: String,
        /// Underlying spawn error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A container runtime command returned an unexpected failure.
    #[error("container runtime `{operation}` failed: {message}")]
    Runtime {
        /// Runtime operation that failed (`inspect`, `logs`, ...).
        operation: &'static str,
        /// Captured diagnostic output.
        message: String,
    },

    /// The background launch of a container exited before the container
    /// became observable.
    #[error("launch of container {name} failed: {message}")]
    LaunchFailed {
        /// Name the container was launched under.
        name: String,
        /// Diagnostic output of the launcher.
        message: String,
    },

    /// The image referenced by a removal is still used by a container.
    #[error("image {image} is still referenced by a container")]
    ImageInUse {
        /// Image that could not be removed.
        image: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl HarnessError {
    /// Returns whether this error must abort the entire run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalSetup { .. } | Self::ToolUnavailable { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, HarnessError>;
