//! Configuration model for a harness run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HarnessError, Result};
use crate::types::ImageRef;

/// Bounded fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy, rejecting a zero attempt budget.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` is zero.
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(HarnessError::Config {
                message: "retry budget must allow at least one attempt".into(),
            });
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Upper bound on the time spent sleeping between attempts.
    #[must_use]
    pub fn worst_case(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_READY_ATTEMPTS,
            interval: Duration::from_millis(constants::DEFAULT_READY_INTERVAL_MS),
        }
    }
}

/// Root configuration for a harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Builder image whose behavior is being verified.
    pub image_under_test: ImageRef,
    /// Expected runtime version string, asserted when present.
    pub platform_version: Option<String>,
    /// Pin for git-hosted sources instead of resolving the latest revision.
    pub source_revision: Option<String>,
    /// Directory containing the local sample applications.
    pub apps_dir: PathBuf,
    /// Additional named application sources (`name`, `uri`).
    pub app_sources: Vec<(String, String)>,
    /// Readiness polling budget.
    pub readiness: RetryPolicy,
    /// HTTP probe budget.
    pub probe: RetryPolicy,
    /// Port the application listens on inside the container.
    pub app_port: u16,
    /// Build tool binary.
    pub build_tool: String,
    /// Container runtime binary.
    pub container_runtime: String,
    /// Restricts the run to these scenario names when non-empty.
    pub only_scenarios: Vec<String>,
}

impl HarnessConfig {
    /// Creates a configuration with defaults for everything but the image.
    #[must_use]
    pub fn new(image_under_test: ImageRef) -> Self {
        Self {
            image_under_test,
            platform_version: None,
            source_revision: None,
            apps_dir: PathBuf::from(constants::DEFAULT_APPS_DIR),
            app_sources: Vec::new(),
            readiness: RetryPolicy::default(),
            probe: RetryPolicy {
                max_attempts: constants::DEFAULT_PROBE_ATTEMPTS,
                interval: Duration::from_millis(constants::DEFAULT_PROBE_INTERVAL_MS),
            },
            app_port: constants::DEFAULT_APP_PORT,
            build_tool: constants::DEFAULT_BUILD_TOOL.into(),
            container_runtime: constants::DEFAULT_CONTAINER_RUNTIME.into(),
            only_scenarios: Vec::new(),
        }
    }

    /// Returns whether a scenario with `name` is selected for this run.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        self.only_scenarios.is_empty() || self.only_scenarios.iter().any(|s| s == name)
    }
}

/// Parses a `NAME=URI` pair as accepted by `--app-source`.
///
/// # Errors
///
/// Returns an error if the separator is missing or either side is empty.
pub fn parse_named_source(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, uri)) if !name.trim().is_empty() && !uri.trim().is_empty() => {
            Ok((name.trim().to_string(), uri.trim().to_string()))
        }
        _ => Err(HarnessError::Config {
            message: format!("expected NAME=URI, got `{raw}`"),
        }),
    }
}
