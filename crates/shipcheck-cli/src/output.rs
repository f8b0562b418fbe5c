//! Formatted output helpers for CLI commands.
//!
//! Everything goes to stderr so that stdout stays free for tooling.

use shipcheck_common::constants;
use shipcheck_suite::assertion::{Assertion, Outcome};
use shipcheck_suite::report::{RunReport, ScenarioReport, Verdict};
use shipcheck_suite::scenario::Scenario;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Prints the banner naming the image under test.
pub fn print_header(image: &str) {
    eprintln!();
    eprintln!(
        "  {BOLD}{}{RESET} {DIM}v{}{RESET}  image {BOLD}{image}{RESET}",
        constants::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
}

/// Prints the scenarios a run would execute.
pub fn print_plan(scenarios: &[Scenario]) {
    for scenario in scenarios {
        let mut steps = vec![format!("build {}", scenario.build.source)];
        if scenario.build.allow_failure {
            steps.push("(failure allowed)".into());
        }
        if scenario.incremental.is_some() {
            steps.push("rebuild incrementally".into());
        }
        if let Some(launch) = &scenario.launch {
            steps.push("launch".into());
            if let Some(probe) = &launch.probe {
                steps.push(format!("probe :{}{}", probe.port, probe.path));
            }
        }
        eprintln!("  {BOLD}{}{RESET} {DIM}{}{RESET}", scenario.name, steps.join(" -> "));
        for assertion in &scenario.assertions {
            eprintln!(
                "      {DIM}-{RESET} {} {} {}",
                assertion.subject, assertion.kind, assertion.expected
            );
        }
    }
    eprintln!();
    eprintln!("  {} scenario(s)", scenarios.len());
}

/// Prints one block per scenario followed by a summary line.
pub fn print_report(report: &RunReport) {
    for scenario in &report.scenarios {
        eprintln!("  {}", verdict_line(scenario));
        if let Verdict::Fail { detail, .. } = &scenario.verdict {
            eprintln!("      {DIM}{detail}{RESET}");
        }
        for assertion in scenario.failed_assertions() {
            eprintln!("      {}", assertion_line(assertion));
        }
        if let Some(cleanup) = &scenario.cleanup {
            for error in &cleanup.errors {
                eprintln!("      {YELLOW}cleanup:{RESET} {error}");
            }
        }
    }

    eprintln!();
    let color = if report.passed() { GREEN } else { RED };
    eprintln!(
        "  {color}{BOLD}{}/{} passed{RESET}, exit code {}",
        report.pass_count(),
        report.scenarios.len(),
        report.exit_code()
    );
}

/// One-line summary of a scenario outcome.
#[must_use]
pub fn verdict_line(scenario: &ScenarioReport) -> String {
    let duration = format_duration(scenario.duration_ms);
    match &scenario.verdict {
        Verdict::Pass => format!("{GREEN}PASS{RESET} {BOLD}{}{RESET} {DIM}({duration}){RESET}", scenario.name),
        Verdict::Fail { reason, .. } => {
            format!("{RED}FAIL{RESET} {BOLD}{}{RESET} {reason} {DIM}({duration}){RESET}", scenario.name)
        }
    }
}

/// Expected and actual values of an assertion.
#[must_use]
pub fn assertion_line(assertion: &Assertion) -> String {
    let marker = match assertion.outcome {
        Outcome::Pass => format!("{GREEN}ok{RESET}"),
        Outcome::Fail => format!("{RED}x{RESET}"),
        Outcome::NotEvaluated => format!("{DIM}-{RESET}"),
    };
    format!(
        "{marker} {} {} {}: {}",
        assertion.subject,
        assertion.kind,
        assertion.expected,
        assertion.actual.as_deref().unwrap_or("not evaluated")
    )
}

/// Formats milliseconds as seconds with one decimal, or plain milliseconds.
#[must_use]
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}.{}s", ms / 1000, (ms % 1000) / 100)
    }
}
