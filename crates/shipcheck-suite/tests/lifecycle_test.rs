//! Scenario lifecycle tests against recording fakes.
//!
//! Every test checks that cleanup ran exactly once for the scenario,
//! whatever state the state machine stopped in.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::time::{Duration, Instant};

use shipcheck_common::types::{HandleStatus, SourceLocation};
use shipcheck_runtime::backend::RuntimeArgs;
use shipcheck_suite::assertion::{Assertion, Outcome, Subject};
use shipcheck_suite::report::{FailureReason, Phase};
use shipcheck_suite::runner::ScenarioRunner;
use shipcheck_suite::scenario::Scenario;
use support::{Behavior, RecordingRuntime, RecordingTool};

fn default_scenario(dir: &tempfile::TempDir, port: u16) -> Scenario {
    Scenario::new("default", SourceLocation::Local(dir.path().to_path_buf()))
        .probe("/", port)
        .assert(Assertion::status_code(200))
        .assert(Assertion::contains(Subject::ProbeBody, "Hello World"))
        .assert(Assertion::contains(
            Subject::Exec(vec!["env".into()]),
            "NODE_ENV=production",
        ))
        .assert(Assertion::lacks(Subject::ContainerLog, "npm ERR!"))
}

// ── Happy path ───────────────────────────────────────────────────────

#[test]
fn end_to_end_pass_cleans_up_container_then_image() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = support::stub_server("200 OK", "Hello World");
    let tool = RecordingTool::new(0, "---> Installing application source");
    let rt = RecordingRuntime::default();
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(port)).unwrap();

    let report = runner.run(&default_scenario(&dir, port)).unwrap();
    server.join().unwrap();

    assert!(report.passed(), "{:?}", report.verdict);
    assert_eq!(
        report.phases,
        vec![
            Phase::NotStarted,
            Phase::Building,
            Phase::Built,
            Phase::Launching,
            Phase::AwaitingReady,
            Phase::Ready,
            Phase::Probing,
            Phase::Asserting,
            Phase::Cleanup,
            Phase::Done,
        ]
    );
    assert!(report.assertions.iter().all(|a| a.outcome == Outcome::Pass));
    assert_eq!(report.probe.as_ref().map(|p| p.status), Some(200));
    assert_eq!(
        report.container.as_ref().map(|h| h.status()),
        Some(HandleStatus::Removed)
    );

    let calls = rt.calls();
    let rm = calls.iter().position(|c| c.starts_with("rm ")).unwrap();
    let rmi = calls.iter().position(|c| c.starts_with("rmi ")).unwrap();
    assert!(rm < rmi, "container must go before its image: {calls:?}");
    assert_eq!(rt.count("stop"), 1);
    assert_eq!(rt.count("rm"), 1);
    assert_eq!(rt.count("rmi"), 1);
    assert_eq!(tool.calls(), vec!["build nodejs nodejs-testapp-default incremental=false"]);
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn probe_without_listener_times_out_and_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let port = support::closed_port();
    let tool = RecordingTool::new(0, "");
    let rt = RecordingRuntime::default();
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(port)).unwrap();

    let report = runner.run(&default_scenario(&dir, port)).unwrap();

    assert_eq!(report.verdict.reason(), Some(FailureReason::ProbeTimeout));
    assert!(report.assertions.iter().all(|a| a.outcome == Outcome::NotEvaluated));
    assert_eq!(report.phases.last(), Some(&Phase::Done));
    assert_eq!(rt.count("rm"), 1);
    assert_eq!(rt.count("rmi"), 1);
    assert_eq!(rt.count("exec"), 0, "no assertion collected after probe timeout");
}

#[test]
fn server_error_is_reported_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = support::stub_server("500 Internal Server Error", "boom");
    let tool = RecordingTool::new(0, "");
    let rt = RecordingRuntime::default();
    let mut config = support::fast_config(port);
    config.probe.max_attempts = 20;
    config.probe.interval = Duration::from_secs(1);
    let runner = ScenarioRunner::new(&tool, &rt, &config).unwrap();

    let start = Instant::now();
    let report = runner.run(&default_scenario(&dir, port)).unwrap();
    server.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.verdict.reason(), Some(FailureReason::AssertionFailed));
    assert_eq!(report.probe.as_ref().map(|p| p.attempts), Some(1));
    let status = &report.assertions[0];
    assert_eq!(status.outcome, Outcome::Fail);
    assert_eq!(status.actual.as_deref(), Some("500"));
    // The remaining assertions are still evaluated on their own.
    assert_eq!(report.assertions[2].outcome, Outcome::Pass);
    assert_eq!(rt.count("rmi"), 1);
}

#[test]
fn build_failure_never_launches() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(1, "npm ERR! code E404");
    let rt = RecordingRuntime::default();
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();

    let report = runner.run(&default_scenario(&dir, 8080)).unwrap();

    assert_eq!(report.verdict.reason(), Some(FailureReason::BuildFailed));
    assert!(!report.phases.contains(&Phase::Launching));
    assert_eq!(rt.count("start"), 0);
    assert_eq!(rt.calls(), vec!["rmi nodejs-testapp-default"]);
}

#[test]
fn readiness_timeout_cancels_the_launch_and_cleans_up_once() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(0, "");
    let rt = RecordingRuntime::new(Behavior {
        observable: false,
        ..Behavior::default()
    });
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();

    let report = runner.run(&default_scenario(&dir, 8080)).unwrap();

    assert_eq!(report.verdict.reason(), Some(FailureReason::ReadinessTimeout));
    assert!(report.phases.contains(&Phase::ReadinessTimeout));
    assert_eq!(
        report.container.as_ref().map(|h| h.status()),
        Some(HandleStatus::Removed)
    );
    // Three polls plus one last look during cleanup.
    assert_eq!(rt.count("inspect"), 4);
    assert_eq!(rt.count("stop"), 0);
    assert_eq!(rt.count("cancel"), 1);
    let cleanup = report.cleanup.as_ref().unwrap();
    assert_eq!(cleanup.launches_cancelled.len(), 1);
    let calls = rt.calls();
    let cancel = calls.iter().position(|c| c.starts_with("cancel ")).unwrap();
    let rmi = calls.iter().position(|c| c.starts_with("rmi ")).unwrap();
    assert!(cancel < rmi, "launch must be cancelled before its image goes: {calls:?}");
}

#[test]
fn refused_launch_is_a_launch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(0, "");
    let rt = RecordingRuntime::new(Behavior {
        refuse_start: true,
        ..Behavior::default()
    });
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();

    let report = runner.run(&default_scenario(&dir, 8080)).unwrap();

    assert_eq!(report.verdict.reason(), Some(FailureReason::LaunchFailed));
    assert!(report.container.is_none());
    assert_eq!(rt.count("rmi"), 1);
}

#[test]
fn fatal_error_mid_scenario_still_releases_resources() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = support::stub_server("200 OK", "Hello World");
    let tool = RecordingTool::new(0, "");
    let rt = RecordingRuntime::new(Behavior {
        exec_fatal: true,
        ..Behavior::default()
    });
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(port)).unwrap();

    let err = runner.run(&default_scenario(&dir, port)).unwrap_err();
    server.join().unwrap();

    assert!(err.is_fatal());
    assert_eq!(rt.count("stop"), 1);
    assert_eq!(rt.count("rm"), 1);
    assert_eq!(rt.count("rmi"), 1);
}

// ── Whole runs ───────────────────────────────────────────────────────

#[test]
fn one_failing_scenario_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(0, "---> Setting npm http proxy to http://redacted@0.0.0.0:8000");
    let rt = RecordingRuntime::default();
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();
    let source = SourceLocation::Local(dir.path().to_path_buf());

    let scenarios = [
        Scenario::new("redaction", source.clone())
            .assert(Assertion::contains_exactly(Subject::BuildLog, "redacted@", 4)),
        Scenario::new("single", source)
            .assert(Assertion::contains_exactly(Subject::BuildLog, "redacted@", 1)),
    ];
    let run = runner.run_all(&scenarios).unwrap();

    assert_eq!(run.scenarios.len(), 2);
    assert!(!run.scenarios[0].passed());
    assert!(run.scenarios[1].passed());
    assert_eq!(run.exit_code(), 1);
    assert_eq!(rt.count("rmi"), 2);
}

#[test]
fn fatal_error_keeps_reports_of_finished_scenarios() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(0, "---> Installing application source");
    let rt = RecordingRuntime::new(Behavior {
        exec_fatal: true,
        ..Behavior::default()
    });
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();
    let source = SourceLocation::Local(dir.path().to_path_buf());

    let scenarios = [
        Scenario::new("build-only", source.clone())
            .assert(Assertion::contains(Subject::BuildLog, "Installing")),
        Scenario::new("exec", source.clone())
            .launch(RuntimeArgs::default())
            .assert(Assertion::contains(Subject::Exec(vec!["env".into()]), "NODE_ENV")),
        Scenario::new("never-reached", source),
    ];
    let aborted = runner.run_all(&scenarios).unwrap_err();

    assert!(aborted.source.is_fatal());
    assert_eq!(aborted.partial.scenarios.len(), 1);
    assert!(aborted.partial.scenarios[0].passed());
    assert_eq!(tool.calls().len(), 2);
    assert_eq!(rt.count("rm"), 1);
    assert_eq!(rt.count("rmi"), 2);
}

#[test]
fn incremental_rebuild_reuses_image_name_and_removes_superseded_image() {
    let dir = tempfile::tempdir().unwrap();
    let tool = RecordingTool::new(0, "---> Restoring build artifacts...");
    let rt = RecordingRuntime::default();
    let runner = ScenarioRunner::new(&tool, &rt, &support::fast_config(8080)).unwrap();

    let scenario = Scenario::new("incremental", SourceLocation::Local(dir.path().to_path_buf()))
        .incremental(vec!["/bin/bash".into(), "-c".into(), "ls -1 node_modules | wc -l".into()])
        .assert(Assertion::matches(Subject::BuildLog, "(?i)restoring build artifacts"));
    let report = runner.run(&scenario).unwrap();

    assert!(report.passed(), "{:?}", report.verdict);
    assert_eq!(
        tool.calls(),
        vec![
            "build nodejs nodejs-testapp-incremental incremental=false",
            "build nodejs nodejs-testapp-incremental incremental=true",
        ]
    );
    assert_eq!(rt.count("run_once"), 2);
    assert_eq!(rt.count("image_id"), 1);
    let removed: Vec<String> = rt
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("rmi "))
        .collect();
    assert_eq!(
        removed,
        vec![
            "rmi nodejs-testapp-incremental",
            "rmi sha256:nodejs-testapp-incremental",
        ]
    );
}
