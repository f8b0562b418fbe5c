//! Per-scenario lifecycle driver.
//!
//! Each scenario walks `NotStarted -> Building -> Built -> Launching ->
//! AwaitingReady -> Ready -> Probing -> Asserting -> Cleanup -> Done`,
//! leaving the happy path for a failure state whenever a step fails. Every
//! path ends in `Cleanup`. A fatal error propagates out of [`ScenarioRunner::run`]
//! and the resource guard cleans up while unwinding the stack frame.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use shipcheck_common::config::{HarnessConfig, RetryPolicy};
use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::ImageRef;
use shipcheck_runtime::backend::ContainerRuntime;
use shipcheck_runtime::build::{BuildInvoker, BuildResult, BuildTool};
use shipcheck_runtime::cleanup::ScenarioResources;
use shipcheck_runtime::command::CommandOutput;
use shipcheck_runtime::launcher;
use shipcheck_runtime::probe::{HttpProbe, ProbeError, ProbeResult};
use shipcheck_runtime::readiness::{ReadinessError, ReadinessPoller};
use thiserror::Error;

use crate::assertion::{Assertion, Observed, Outcome, Subject};
use crate::report::{FailureReason, Phase, RunReport, ScenarioReport, Verdict};
use crate::scenario::{IncrementalStep, LaunchStep, Scenario};

type Failure = (FailureReason, String);

/// Runs scenarios one after another against a single image under test.
pub struct ScenarioRunner<'a> {
    invoker: BuildInvoker<'a>,
    runtime: &'a dyn ContainerRuntime,
    image_name: String,
    readiness: RetryPolicy,
    probe: HttpProbe,
    interrupt: Option<Arc<AtomicBool>>,
}

/// A run stopped by a fatal error.
#[derive(Debug, Error)]
#[error("run aborted after {} scenario(s): {source}", .partial.scenarios.len())]
pub struct RunAborted {
    /// Reports of the scenarios that finished before the error.
    pub partial: Box<RunReport>,
    /// The fatal error.
    pub source: HarnessError,
}

/// Mutable state accumulated while one scenario runs.
struct Progress<'s> {
    name: &'s str,
    phases: Vec<Phase>,
    build: Option<BuildResult>,
    rebuild: Option<BuildResult>,
    probe: Option<ProbeResult>,
    generated: Vec<Assertion>,
    evaluated: Vec<Assertion>,
    observed: HashMap<Subject, Observed>,
}

impl<'s> Progress<'s> {
    fn new(name: &'s str) -> Self {
        Self {
            name,
            phases: vec![Phase::NotStarted],
            build: None,
            rebuild: None,
            probe: None,
            generated: Vec::new(),
            evaluated: Vec::new(),
            observed: HashMap::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(scenario = self.name, %phase, "phase");
        self.phases.push(phase);
    }

    fn record_build(&mut self, result: &BuildResult) {
        let _ = self.observed.insert(Subject::BuildLog, Observed::text(result.log.clone()));
        let _ = self
            .observed
            .insert(Subject::BuildExit, Observed::code(i64::from(result.exit_status)));
    }
}

impl<'a> ScenarioRunner<'a> {
    /// Creates a runner for the image named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        builder: &'a dyn BuildTool,
        runtime: &'a dyn ContainerRuntime,
        config: &HarnessConfig,
    ) -> Result<Self> {
        Ok(Self {
            invoker: BuildInvoker::new(builder, config.image_under_test.clone()),
            runtime,
            image_name: config.image_under_test.to_string(),
            readiness: config.readiness,
            probe: HttpProbe::new(config.probe)?,
            interrupt: None,
        })
    }

    /// Stops starting new scenarios once `flag` is set.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Runs every scenario in order and aggregates the results.
    ///
    /// A failing scenario does not stop the run. Only fatal errors do.
    ///
    /// # Errors
    ///
    /// Returns [`RunAborted`] if a scenario is malformed, two scenarios
    /// share a name, or a fatal error occurs while running. The error
    /// carries the reports of every scenario that finished first.
    pub fn run_all(&self, scenarios: &[Scenario]) -> std::result::Result<RunReport, RunAborted> {
        let mut run = RunReport::new(self.image_name.clone());
        if let Err(source) = check_suite(scenarios) {
            return Err(RunAborted {
                partial: Box::new(run),
                source,
            });
        }

        for scenario in scenarios {
            if self.interrupted() {
                tracing::warn!(scenario = %scenario.name, "interrupted, skipping");
                run.scenarios
                    .push(ScenarioReport::interrupted(&scenario.name, &scenario.assertions));
                continue;
            }
            match self.run(scenario) {
                Ok(report) => run.scenarios.push(report),
                Err(source) => {
                    tracing::error!(scenario = %scenario.name, error = %source, "run aborted");
                    return Err(RunAborted {
                        partial: Box::new(run),
                        source,
                    });
                }
            }
        }
        tracing::info!(
            passed = run.pass_count(),
            total = run.scenarios.len(),
            "run finished"
        );
        Ok(run)
    }

    /// Runs one scenario to completion, cleanup included.
    ///
    /// # Errors
    ///
    /// Returns only fatal errors. Resources acquired before the error are
    /// released before it is returned.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        tracing::info!(scenario = %scenario.name, "scenario started");
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();

        let mut resources = ScenarioResources::new(self.runtime);
        let mut progress = Progress::new(&scenario.name);
        let failure = self.drive(scenario, &mut resources, &mut progress)?;

        if progress.evaluated.is_empty() {
            let why = failure
                .as_ref()
                .map_or_else(|| "not reached".to_string(), |(reason, _)| reason.to_string());
            progress.evaluated = scenario
                .assertions
                .iter()
                .chain(&progress.generated)
                .map(|a| a.skipped(&why))
                .collect();
        }

        progress.enter(Phase::Cleanup);
        let released = resources.release();
        progress.enter(Phase::Done);

        let verdict = match failure {
            None => {
                tracing::info!(scenario = %scenario.name, "scenario passed");
                Verdict::Pass
            }
            Some((reason, detail)) => {
                tracing::warn!(scenario = %scenario.name, %reason, %detail, "scenario failed");
                Verdict::Fail { reason, detail }
            }
        };

        Ok(ScenarioReport {
            name: scenario.name.clone(),
            verdict,
            phases: progress.phases,
            build: progress.build,
            rebuild: progress.rebuild,
            container: released.handle,
            probe: progress.probe,
            assertions: progress.evaluated,
            cleanup: Some(released.report),
            started_at,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn drive(
        &self,
        scenario: &Scenario,
        resources: &mut ScenarioResources<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<Option<Failure>> {
        progress.enter(Phase::Building);
        let step = &scenario.build;
        let build = self
            .invoker
            .build(&step.source, &self.image_name, &scenario.name, &step.args)?;
        resources.track_image(build.image.clone());
        progress.record_build(&build);
        let image = build.image.clone();
        let succeeded = build.succeeded();
        let exit_status = build.exit_status;
        progress.build = Some(build);

        if succeeded {
            progress.enter(Phase::Built);
        } else {
            progress.enter(Phase::BuildFailed);
            if !step.allow_failure {
                return Ok(Some((
                    FailureReason::BuildFailed,
                    format!("build exited with status {exit_status}"),
                )));
            }
        }

        if let Some(incremental) = &scenario.incremental {
            if let Some(failure) = self.rebuild(scenario, incremental, &image, resources, progress)? {
                return Ok(Some(failure));
            }
        }

        if let Some(launch) = &scenario.launch {
            if let Some(failure) = self.launch(launch, &image, resources, progress)? {
                return Ok(Some(failure));
            }
        }

        progress.enter(Phase::Asserting);
        self.evaluate(scenario, &image, resources, progress)
    }

    fn rebuild(
        &self,
        scenario: &Scenario,
        step: &IncrementalStep,
        image: &ImageRef,
        resources: &mut ScenarioResources<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<Option<Failure>> {
        let baseline = match self.snapshot(image, &step.snapshot)? {
            Ok(text) => text,
            Err(message) => return Ok(Some((FailureReason::StepFailed, message))),
        };
        tracing::debug!(scenario = %scenario.name, baseline = baseline.trim(), "snapshot before rebuild");

        // The rebuild moves the tag, so the first image is only reachable by id.
        match self.runtime.image_id(image) {
            Ok(Some(id)) => resources.track_image(ImageRef::new(id)),
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!(%image, error = %e, "cannot resolve image id before rebuild"),
        }

        let args = scenario.build.args.clone().incremental();
        let rebuild = self
            .invoker
            .build(&scenario.build.source, &self.image_name, &scenario.name, &args)?;
        progress.record_build(&rebuild);
        let exit_status = rebuild.exit_status;
        let succeeded = rebuild.succeeded();
        progress.rebuild = Some(rebuild);
        if !succeeded {
            progress.enter(Phase::BuildFailed);
            return Ok(Some((
                FailureReason::BuildFailed,
                format!("incremental rebuild exited with status {exit_status}"),
            )));
        }

        let after = match self.snapshot(image, &step.snapshot)? {
            Ok(text) => text,
            Err(message) => return Ok(Some((FailureReason::StepFailed, message))),
        };
        let _ = progress
            .observed
            .insert(Subject::IncrementalSnapshot, Observed::text(after));
        progress.generated.push(Assertion::matches(
            Subject::IncrementalSnapshot,
            format!(r"\A\s*{}\s*\z", regex::escape(baseline.trim())),
        ));
        Ok(None)
    }

    fn snapshot(
        &self,
        image: &ImageRef,
        cmd: &[String],
    ) -> Result<std::result::Result<String, String>> {
        match self.runtime.run_once(image, cmd) {
            Ok(out) if out.success() => Ok(Ok(out.stdout)),
            Ok(out) => Ok(Err(format!(
                "snapshot `{}` exited with {}: {}",
                cmd.join(" "),
                out.exit_code,
                out.stderr.trim()
            ))),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(Err(format!("snapshot `{}`: {e}", cmd.join(" ")))),
        }
    }

    fn launch(
        &self,
        step: &LaunchStep,
        image: &ImageRef,
        resources: &mut ScenarioResources<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<Option<Failure>> {
        progress.enter(Phase::Launching);
        let handle = match launcher::launch(self.runtime, image, &step.args) {
            Ok(handle) => handle,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                progress.enter(Phase::LaunchFailed);
                return Ok(Some((FailureReason::LaunchFailed, e.to_string())));
            }
        };
        let handle = resources.adopt(handle);

        progress.enter(Phase::AwaitingReady);
        match ReadinessPoller::new(self.runtime, self.readiness).await_ready(handle, step.requirement) {
            Ok(_) => progress.enter(Phase::Ready),
            Err(ReadinessError::Fatal(e)) => return Err(e),
            Err(e @ ReadinessError::LaunchFailed { .. }) => {
                progress.enter(Phase::LaunchFailed);
                return Ok(Some((FailureReason::LaunchFailed, e.to_string())));
            }
            Err(e @ ReadinessError::Timeout { .. }) => {
                progress.enter(Phase::ReadinessTimeout);
                return Ok(Some((FailureReason::ReadinessTimeout, e.to_string())));
            }
        }

        let Some(probe) = &step.probe else {
            return Ok(None);
        };
        progress.enter(Phase::Probing);
        let Some(address) = handle.address() else {
            return Ok(Some((
                FailureReason::StepFailed,
                "container has no address to probe".into(),
            )));
        };
        match self.probe.probe(address, probe.port, &probe.path) {
            Ok(result) => {
                let _ = progress
                    .observed
                    .insert(Subject::ProbeStatus, Observed::code(i64::from(result.status)));
                let _ = progress
                    .observed
                    .insert(Subject::ProbeBody, Observed::text(result.body.clone()));
                progress.probe = Some(result);
                Ok(None)
            }
            Err(e @ ProbeError::Timeout { .. }) => Ok(Some((FailureReason::ProbeTimeout, e.to_string()))),
            Err(e @ ProbeError::Request { .. }) => Ok(Some((FailureReason::StepFailed, e.to_string()))),
        }
    }

    /// Evaluates authored then generated assertions in order.
    ///
    /// Each assertion is judged on its own. If a value cannot be collected,
    /// that assertion and every later one are left unevaluated.
    fn evaluate(
        &self,
        scenario: &Scenario,
        image: &ImageRef,
        resources: &ScenarioResources<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<Option<Failure>> {
        let pending: Vec<Assertion> = scenario
            .assertions
            .iter()
            .chain(&progress.generated)
            .cloned()
            .collect();

        let mut failure: Option<Failure> = None;
        let mut blocked: Option<String> = None;
        for assertion in pending {
            if let Some(why) = &blocked {
                progress.evaluated.push(assertion.skipped(why));
                continue;
            }
            match self.collect(&assertion.subject, image, resources, progress)? {
                Ok(observed) => {
                    let evaluated = assertion.evaluate(&observed);
                    if evaluated.outcome == Outcome::Fail && failure.is_none() {
                        failure = Some((
                            FailureReason::AssertionFailed,
                            format!(
                                "{} {} {}: got {}",
                                evaluated.subject,
                                evaluated.kind,
                                evaluated.expected,
                                evaluated.actual.as_deref().unwrap_or("nothing")
                            ),
                        ));
                    }
                    progress.evaluated.push(evaluated);
                }
                Err(message) => {
                    tracing::warn!(scenario = %scenario.name, subject = %assertion.subject, %message, "cannot collect value");
                    if failure.is_none() {
                        failure = Some((FailureReason::StepFailed, message.clone()));
                    }
                    progress.evaluated.push(assertion.skipped(&message));
                    blocked = Some(message);
                }
            }
        }
        Ok(failure)
    }

    fn collect(
        &self,
        subject: &Subject,
        image: &ImageRef,
        resources: &ScenarioResources<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<std::result::Result<Observed, String>> {
        if let Some(observed) = progress.observed.get(subject) {
            return Ok(Ok(observed.clone()));
        }

        let id = resources.handle().and_then(|h| h.id()).cloned();
        let fetched: Result<Observed> = match (subject, id) {
            (Subject::ContainerLog, Some(id)) => self.runtime.logs(&id).map(Observed::text),
            (Subject::Exec(cmd), Some(id)) => self.runtime.exec(&id, cmd).map(|out| command_observed(&out)),
            (Subject::ImageCommand(cmd), _) => self.runtime.run_once(image, cmd).map(|out| command_observed(&out)),
            (subject, _) => return Ok(Err(format!("no value available for {subject}"))),
        };

        match fetched {
            Ok(observed) => {
                let _ = progress.observed.insert(subject.clone(), observed.clone());
                Ok(Ok(observed))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(Err(format!("collecting {subject}: {e}"))),
        }
    }
}

fn check_suite(scenarios: &[Scenario]) -> Result<()> {
    let mut names = HashSet::new();
    for scenario in scenarios {
        scenario.validate()?;
        if !names.insert(scenario.name.as_str()) {
            return Err(HarnessError::Config {
                message: format!("duplicate scenario name `{}`", scenario.name),
            });
        }
    }
    Ok(())
}

fn command_observed(out: &CommandOutput) -> Observed {
    Observed {
        text: out.combined(),
        code: Some(i64::from(out.exit_code)),
    }
}
