//! Test scenario descriptions.

use serde::{Deserialize, Serialize};
use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::SourceLocation;
use shipcheck_runtime::backend::RuntimeArgs;
use shipcheck_runtime::build::BuildArgs;
use shipcheck_runtime::readiness::Requirement;

use crate::assertion::{Assertion, Matcher, Subject};

/// How the application image is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    /// Application source.
    pub source: SourceLocation,
    /// Build configuration.
    pub args: BuildArgs,
    /// Keep going when the build fails, so its log can be asserted on.
    pub allow_failure: bool,
}

/// Rebuild-with-reuse check run after the first build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalStep {
    /// Command whose output summarises installed artifacts.
    pub snapshot: Vec<String>,
}

/// HTTP request made once the container is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStep {
    /// Request path.
    pub path: String,
    /// Port inside the container.
    pub port: u16,
}

/// How the built image is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchStep {
    /// Runtime arguments.
    pub args: RuntimeArgs,
    /// What must be observable before the container counts as ready.
    pub requirement: Requirement,
    /// Optional HTTP probe.
    pub probe: Option<ProbeStep>,
}

impl Default for LaunchStep {
    fn default() -> Self {
        Self {
            args: RuntimeArgs::default(),
            requirement: Requirement::Identifier,
            probe: None,
        }
    }
}

/// One build-launch-verify-cleanup test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario name, also used to name the built image.
    pub name: String,
    /// Build step.
    pub build: BuildStep,
    /// Optional incremental rebuild check.
    pub incremental: Option<IncrementalStep>,
    /// Optional launch; scenarios without one only inspect the build.
    pub launch: Option<LaunchStep>,
    /// Checks evaluated in order once all steps have run.
    pub assertions: Vec<Assertion>,
}

impl Scenario {
    /// Creates a scenario that builds `source` with default arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, source: SourceLocation) -> Self {
        Self {
            name: name.into(),
            build: BuildStep {
                source,
                args: BuildArgs::default(),
                allow_failure: false,
            },
            incremental: None,
            launch: None,
            assertions: Vec::new(),
        }
    }

    /// Sets a build environment variable.
    #[must_use]
    pub fn build_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build.args = self.build.args.env(key, value);
        self
    }

    /// Lets the scenario continue past a failed build.
    #[must_use]
    pub const fn allow_build_failure(mut self) -> Self {
        self.build.allow_failure = true;
        self
    }

    /// Adds an incremental rebuild comparing `snapshot` output.
    #[must_use]
    pub fn incremental(mut self, snapshot: Vec<String>) -> Self {
        self.incremental = Some(IncrementalStep { snapshot });
        self
    }

    /// Launches the built image with `args`.
    #[must_use]
    pub fn launch(mut self, args: RuntimeArgs) -> Self {
        let step = self.launch.get_or_insert_with(LaunchStep::default);
        step.args = args;
        self
    }

    /// Launches (if not already) and probes `path` on `port` once ready.
    #[must_use]
    pub fn probe(mut self, path: impl Into<String>, port: u16) -> Self {
        let step = self.launch.get_or_insert_with(LaunchStep::default);
        step.requirement = Requirement::Address;
        step.probe = Some(ProbeStep {
            path: path.into(),
            port,
        });
        self
    }

    /// Appends an assertion.
    #[must_use]
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Checks that every assertion can be collected from the declared steps.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| HarnessError::Config {
            message: format!("scenario `{}`: {message}", self.name),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.build.allow_failure && (self.launch.is_some() || self.incremental.is_some()) {
            return Err(invalid(
                "a build allowed to fail cannot be launched or rebuilt".into(),
            ));
        }
        if let Some(step) = &self.incremental {
            if step.snapshot.is_empty() {
                return Err(invalid("incremental snapshot command is empty".into()));
            }
        }
        if let Some(LaunchStep {
            probe: Some(_),
            requirement: Requirement::Identifier,
            ..
        }) = &self.launch
        {
            return Err(invalid("probing requires an address".into()));
        }

        for assertion in &self.assertions {
            let subject = &assertion.subject;
            if subject.needs_container() && self.launch.is_none() {
                return Err(invalid(format!("{subject} needs a launched container")));
            }
            if subject.needs_probe() && self.launch.as_ref().and_then(|l| l.probe.as_ref()).is_none() {
                return Err(invalid(format!("{subject} needs a probe")));
            }
            if *subject == Subject::IncrementalSnapshot && self.incremental.is_none() {
                return Err(invalid(format!("{subject} needs an incremental step")));
            }
            if matches!(subject, Subject::Exec(cmd) | Subject::ImageCommand(cmd) if cmd.is_empty()) {
                return Err(invalid("command subject is empty".into()));
            }
            if assertion.expected.matcher().is_some_and(Matcher::is_empty) {
                return Err(invalid(format!("{subject} {} has nothing to match", assertion.kind)));
            }
        }
        Ok(())
    }
}
