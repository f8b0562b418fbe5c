//! `shipcheck run`: execute the scenario suite.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Args;
use shipcheck_runtime::backend::docker::DockerCli;
use shipcheck_runtime::build::{self, S2iBuilder};
use shipcheck_runtime::preflight;
use shipcheck_suite::catalog;
use shipcheck_suite::runner::ScenarioRunner;

use super::SuiteArgs;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite selection and budgets.
    #[command(flatten)]
    pub suite: SuiteArgs,

    /// Also write the run report as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report_json: Option<PathBuf>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if a prerequisite is missing, a fatal error aborts
/// the run, or the JSON report cannot be written.
pub fn execute(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let config = args.suite.to_config()?;
    output::print_header(config.image_under_test.as_str());

    let _ = preflight::require_tool(&config.build_tool)?;
    let _ = preflight::require_tool(&config.container_runtime)?;
    let runtime = DockerCli::new(config.container_runtime.clone());
    preflight::require_image(&runtime, &config.image_under_test)?;

    let scenarios = catalog::default_suite(&config, |url| match build::resolve_latest_revision(url) {
        Ok(rev) => Some(rev),
        Err(e) => {
            tracing::warn!(%url, error = %e, "cannot resolve latest revision, using default branch");
            None
        }
    });
    if scenarios.is_empty() {
        anyhow::bail!("no scenario matches the selection {:?}", config.only_scenarios);
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let builder = S2iBuilder::new(config.build_tool.clone());
    let runner = ScenarioRunner::new(&builder, &runtime, &config)?.with_interrupt(interrupt);
    let report = match runner.run_all(&scenarios) {
        Ok(report) => report,
        Err(aborted) => {
            if !aborted.partial.scenarios.is_empty() {
                output::print_report(&aborted.partial);
            }
            return Err(aborted.source.into());
        }
    };

    output::print_report(&report);
    if let Some(path) = &args.report_json {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "JSON report written");
    }

    Ok(ExitCode::from(report.exit_code()))
}
