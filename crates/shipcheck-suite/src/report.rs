//! Per-scenario and per-run reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use shipcheck_common::error::Result;
use shipcheck_runtime::build::BuildResult;
use shipcheck_runtime::cleanup::CleanupReport;
use shipcheck_runtime::container::ContainerHandle;
use shipcheck_runtime::probe::ProbeResult;

use crate::assertion::{Assertion, Outcome};

/// States of the per-scenario lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing has run yet.
    NotStarted,
    /// The build tool is running.
    Building,
    /// The build exited non-zero.
    BuildFailed,
    /// The build produced an image.
    Built,
    /// The runtime has been asked to start a container.
    Launching,
    /// The runtime refused or aborted the launch.
    LaunchFailed,
    /// Waiting for the container to become observable.
    AwaitingReady,
    /// The readiness budget ran out.
    ReadinessTimeout,
    /// The container is running and reachable.
    Ready,
    /// The HTTP probe is running.
    Probing,
    /// Assertions are being evaluated.
    Asserting,
    /// Resources are being released.
    Cleanup,
    /// Terminal state.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a scenario failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// At least one assertion did not hold.
    AssertionFailed,
    /// The build tool exited non-zero.
    BuildFailed,
    /// The container could not be started.
    LaunchFailed,
    /// The container never became ready.
    ReadinessTimeout,
    /// The service never accepted a connection.
    ProbeTimeout,
    /// A value needed by an assertion could not be collected.
    StepFailed,
    /// The run was interrupted before the scenario could start.
    Interrupted,
}

impl FailureReason {
    /// Process exit code reported for this failure.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::AssertionFailed => 1,
            Self::BuildFailed => 2,
            Self::LaunchFailed => 3,
            Self::ReadinessTimeout => 4,
            Self::ProbeTimeout => 5,
            Self::StepFailed => 6,
            Self::Interrupted => 130,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AssertionFailed => "assertion failed",
            Self::BuildFailed => "build failed",
            Self::LaunchFailed => "launch failed",
            Self::ReadinessTimeout => "readiness timeout",
            Self::ProbeTimeout => "probe timeout",
            Self::StepFailed => "step failed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Final verdict of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    /// Every step succeeded and every assertion held.
    Pass,
    /// The scenario failed.
    Fail {
        /// Failure category.
        reason: FailureReason,
        /// Human-readable diagnostic.
        detail: String,
    },
}

impl Verdict {
    /// Returns the failure reason, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Pass => None,
            Self::Fail { reason, .. } => Some(*reason),
        }
    }
}

/// Everything one scenario did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Pass or fail.
    pub verdict: Verdict,
    /// States the scenario went through, in order.
    pub phases: Vec<Phase>,
    /// First build.
    pub build: Option<BuildResult>,
    /// Incremental rebuild, if the scenario had one.
    pub rebuild: Option<BuildResult>,
    /// Final state of the launched container.
    pub container: Option<ContainerHandle>,
    /// Probe answer.
    pub probe: Option<ProbeResult>,
    /// Assertions with their outcomes.
    pub assertions: Vec<Assertion>,
    /// What cleanup did.
    pub cleanup: Option<CleanupReport>,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ScenarioReport {
    /// Report for a scenario that never started because the run was interrupted.
    #[must_use]
    pub fn interrupted(name: impl Into<String>, assertions: &[Assertion]) -> Self {
        Self {
            name: name.into(),
            verdict: Verdict::Fail {
                reason: FailureReason::Interrupted,
                detail: "run interrupted before the scenario started".into(),
            },
            phases: vec![Phase::NotStarted],
            build: None,
            rebuild: None,
            container: None,
            probe: None,
            assertions: assertions.iter().map(|a| a.skipped("interrupted")).collect(),
            cleanup: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            duration_ms: 0,
        }
    }

    /// Returns whether the scenario passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    /// Assertions that were evaluated and failed.
    pub fn failed_assertions(&self) -> impl Iterator<Item = &Assertion> {
        self.assertions.iter().filter(|a| a.outcome == Outcome::Fail)
    }
}

/// Aggregated outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Image whose behavior was verified.
    pub image_under_test: String,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    /// Scenario reports in execution order.
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    /// Creates an empty report for `image_under_test`.
    #[must_use]
    pub fn new(image_under_test: impl Into<String>) -> Self {
        Self {
            image_under_test: image_under_test.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
            scenarios: Vec::new(),
        }
    }

    /// Returns whether every scenario passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }

    /// Number of passing scenarios.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    /// Exit code of the first failing scenario, or zero.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.scenarios
            .iter()
            .find_map(|s| s.verdict.reason())
            .map_or(0, FailureReason::code)
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
