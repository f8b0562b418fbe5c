//! `shipcheck plan`: show what a run would do.

use std::process::ExitCode;

use clap::Args;
use shipcheck_suite::catalog;

use super::SuiteArgs;
use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Suite selection and budgets.
    #[command(flatten)]
    pub suite: SuiteArgs,
}

/// Executes the `plan` command.
///
/// Git sources are listed unpinned unless a revision override is given;
/// nothing is contacted.
///
/// # Errors
///
/// Returns an error if the arguments do not form a valid configuration
/// or a scenario is malformed.
pub fn execute(args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let config = args.suite.to_config()?;
    let scenarios = catalog::default_suite(&config, |_| None);
    for scenario in &scenarios {
        scenario.validate()?;
    }
    output::print_header(config.image_under_test.as_str());
    output::print_plan(&scenarios);
    Ok(ExitCode::SUCCESS)
}
