//! CLI command definitions and dispatch.

pub mod plan;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use shipcheck_common::config::{HarnessConfig, RetryPolicy, parse_named_source};
use shipcheck_common::constants;
use shipcheck_common::types::ImageRef;

/// shipcheck: end-to-end verification of source-to-image builder images.
#[derive(Parser, Debug)]
#[command(name = "shipcheck", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Trace every external command, poll attempt, and assertion.
    #[arg(
        long,
        short,
        global = true,
        env = "DEBUG",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build, launch, and verify every selected scenario.
    Run(run::RunArgs),
    /// List the scenarios a run would execute, without running them.
    Plan(plan::PlanArgs),
}

/// Options shared by commands that assemble the scenario suite.
#[derive(Args, Debug, Clone)]
pub struct SuiteArgs {
    /// Builder image under test.
    #[arg(long, env = "IMAGE_NAME")]
    pub image: String,

    /// Expected runtime version, asserted against `node --version`.
    #[arg(long = "version-expect", env = "VERSION")]
    pub version_expect: Option<String>,

    /// Pin git-hosted sources to this revision instead of the latest.
    #[arg(long, env = "SOURCE_REVISION")]
    pub source_revision: Option<String>,

    /// Directory holding the sample applications.
    #[arg(long, env = "APPS_DIR", default_value = constants::DEFAULT_APPS_DIR)]
    pub apps_dir: PathBuf,

    /// Extra application source as NAME=URI (repeatable).
    #[arg(long = "app-source", value_name = "NAME=URI")]
    pub app_sources: Vec<String>,

    /// Run only the named scenario (repeatable).
    #[arg(long = "scenario", value_name = "NAME")]
    pub scenarios: Vec<String>,

    /// Readiness polling attempts.
    #[arg(long, default_value_t = constants::DEFAULT_READY_ATTEMPTS)]
    pub ready_attempts: u32,

    /// Milliseconds between readiness polls.
    #[arg(long, default_value_t = constants::DEFAULT_READY_INTERVAL_MS)]
    pub ready_interval_ms: u64,

    /// HTTP probe attempts.
    #[arg(long, default_value_t = constants::DEFAULT_PROBE_ATTEMPTS)]
    pub probe_attempts: u32,

    /// Milliseconds between HTTP probe attempts.
    #[arg(long, default_value_t = constants::DEFAULT_PROBE_INTERVAL_MS)]
    pub probe_interval_ms: u64,

    /// Port the application listens on inside the container.
    #[arg(long, default_value_t = constants::DEFAULT_APP_PORT)]
    pub port: u16,

    /// Source-to-image build tool binary.
    #[arg(long, env = "S2I_BIN", default_value = constants::DEFAULT_BUILD_TOOL)]
    pub build_tool: String,

    /// Container runtime binary.
    #[arg(long, env = "DOCKER_BIN", default_value = constants::DEFAULT_CONTAINER_RUNTIME)]
    pub container_runtime: String,
}

impl SuiteArgs {
    /// Converts parsed arguments into a harness configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a retry budget is zero or an app source is
    /// not of the form `NAME=URI`.
    pub fn to_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = HarnessConfig::new(ImageRef::new(self.image.clone()));
        config.platform_version.clone_from(&self.version_expect);
        config.source_revision.clone_from(&self.source_revision);
        config.apps_dir.clone_from(&self.apps_dir);
        config.app_sources = self
            .app_sources
            .iter()
            .map(|raw| parse_named_source(raw))
            .collect::<Result<_, _>>()?;
        config.only_scenarios.clone_from(&self.scenarios);
        config.readiness = RetryPolicy::new(
            self.ready_attempts,
            Duration::from_millis(self.ready_interval_ms),
        )?;
        config.probe = RetryPolicy::new(
            self.probe_attempts,
            Duration::from_millis(self.probe_interval_ms),
        )?;
        config.app_port = self.port;
        config.build_tool.clone_from(&self.build_tool);
        config.container_runtime.clone_from(&self.container_runtime);
        Ok(config)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if a prerequisite is missing or the run cannot proceed.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Run(args) => run::execute(&args),
        Command::Plan(args) => plan::execute(&args),
    }
}
