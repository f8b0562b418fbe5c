//! Build invocation: turning application source into a runnable image.
//!
//! The harness never builds images itself. It drives an external
//! source-to-image tool through the [`BuildTool`] seam and records what
//! the tool printed and how it exited.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::{ImageRef, SourceLocation};

use crate::command;

/// Build configuration for one scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArgs {
    /// Environment variables made visible to the build scripts.
    pub env: BTreeMap<String, String>,
    /// Reuse artifacts from a previous image with the same tag.
    pub incremental: bool,
    /// Extra tool options, passed as `--key=value`.
    pub options: BTreeMap<String, String>,
}

impl BuildArgs {
    /// Adds a build environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Adds a raw tool option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.options.insert(key.into(), value.into());
        self
    }

    /// Returns a copy with incremental reuse switched on.
    #[must_use]
    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }
}

/// What the build tool reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Combined build log.
    pub log: String,
    /// Exit status of the build tool.
    pub exit_status: i32,
}

/// Result of one build. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Image the build was asked to produce.
    pub image: ImageRef,
    /// Combined build log.
    pub log: String,
    /// Exit status of the build tool.
    pub exit_status: i32,
    /// RFC 3339 timestamp at which the build started.
    pub started_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl BuildResult {
    /// Returns whether the build tool exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// External image build tool.
pub trait BuildTool: Send + Sync {
    /// Builds `output` from `source` on top of `base_image`.
    ///
    /// A failed build is a normal [`BuildOutput`] with a non-zero status.
    ///
    /// # Errors
    ///
    /// Returns an error only if the tool itself cannot be run.
    fn invoke(
        &self,
        source: &SourceLocation,
        base_image: &ImageRef,
        output: &ImageRef,
        args: &BuildArgs,
    ) -> Result<BuildOutput>;
}

/// [`BuildTool`] backed by the `s2i` command line.
#[derive(Debug, Clone)]
pub struct S2iBuilder {
    binary: String,
}

impl S2iBuilder {
    /// Creates a builder that runs the given `s2i` binary.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Assembles the command-line arguments for one build.
    #[must_use]
    pub fn command_args(
        source: &SourceLocation,
        base_image: &ImageRef,
        output: &ImageRef,
        args: &BuildArgs,
    ) -> Vec<String> {
        let mut argv = vec![
            "build".to_string(),
            source.uri(),
            base_image.to_string(),
            output.to_string(),
        ];
        if let SourceLocation::Git {
            revision: Some(rev),
            ..
        } = source
        {
            argv.push(format!("--ref={rev}"));
        }
        for (key, value) in &args.env {
            argv.push("-e".into());
            argv.push(format!("{key}={value}"));
        }
        if args.incremental {
            argv.push("--incremental=true".into());
        }
        for (key, value) in &args.options {
            argv.push(format!("--{key}={value}"));
        }
        argv
    }
}

impl BuildTool for S2iBuilder {
    fn invoke(
        &self,
        source: &SourceLocation,
        base_image: &ImageRef,
        output: &ImageRef,
        args: &BuildArgs,
    ) -> Result<BuildOutput> {
        let argv = Self::command_args(source, base_image, output, args);
        let out = command::run(&self.binary, &argv)?;
        Ok(BuildOutput {
            log: out.combined(),
            exit_status: out.exit_code,
        })
    }
}

/// Runs the build tool against a base image and names the outputs.
pub struct BuildInvoker<'a> {
    tool: &'a dyn BuildTool,
    base_image: ImageRef,
}

impl<'a> BuildInvoker<'a> {
    /// Creates an invoker that builds on top of `base_image`.
    #[must_use]
    pub fn new(tool: &'a dyn BuildTool, base_image: ImageRef) -> Self {
        Self { tool, base_image }
    }

    /// Builds `source` into an image named from `image_name` and `suffix`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if a local source directory does not exist
    /// or the build tool cannot be run. A failed build is an `Ok` result.
    pub fn build(
        &self,
        source: &SourceLocation,
        image_name: &str,
        suffix: &str,
        args: &BuildArgs,
    ) -> Result<BuildResult> {
        if let SourceLocation::Local(path) = source {
            if !path.is_dir() {
                return Err(HarnessError::FatalSetup {
                    message: format!("source directory {} is not reachable", path.display()),
                });
            }
        }

        let image = ImageRef::for_scenario(image_name, suffix);
        tracing::info!(%source, %image, incremental = args.incremental, "building image");

        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        let output = self.tool.invoke(source, &self.base_image, &image, args)?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if output.exit_status == 0 {
            tracing::info!(%image, duration_ms, "build succeeded");
        } else {
            tracing::warn!(%image, exit_status = output.exit_status, "build failed");
        }

        Ok(BuildResult {
            image,
            log: output.log,
            exit_status: output.exit_status,
            started_at,
            duration_ms,
        })
    }
}

/// Resolves the commit at the tip of a remote repository's default branch.
///
/// # Errors
///
/// Returns an error if `git` cannot be run or the remote does not answer.
pub fn resolve_latest_revision(url: &str) -> Result<String> {
    let out = command::run("git", ["ls-remote", url, "HEAD"])?;
    if !out.success() {
        return Err(HarnessError::Runtime {
            operation: "git ls-remote",
            message: out.stderr.trim().to_string(),
        });
    }
    out.stdout
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| HarnessError::Runtime {
            operation: "git ls-remote",
            message: format!("no HEAD reported by {url}"),
        })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedTool {
        exit_status: i32,
        seen: Mutex<Vec<String>>,
    }

    impl BuildTool for ScriptedTool {
        fn invoke(
            &self,
            _source: &SourceLocation,
            _base_image: &ImageRef,
            output: &ImageRef,
            _args: &BuildArgs,
        ) -> Result<BuildOutput> {
            self.seen.lock().unwrap().push(output.to_string());
            Ok(BuildOutput {
                log: "---> Installing application source".into(),
                exit_status: self.exit_status,
            })
        }
    }

    #[test]
    fn s2i_arguments_include_env_and_incremental() {
        let args = BuildArgs::default()
            .env("DEV_MODE", "true")
            .option("pull-policy", "never")
            .incremental();
        let argv = S2iBuilder::command_args(
            &SourceLocation::Local(PathBuf::from("test/test-app")),
            &ImageRef::new("nodejs"),
            &ImageRef::new("nodejs-testapp-default"),
            &args,
        );
        assert_eq!(
            argv,
            vec![
                "build",
                "test/test-app",
                "nodejs",
                "nodejs-testapp-default",
                "-e",
                "DEV_MODE=true",
                "--incremental=true",
                "--pull-policy=never",
            ]
        );
    }

    #[test]
    fn s2i_arguments_pin_git_revision() {
        let argv = S2iBuilder::command_args(
            &SourceLocation::Git {
                url: "https://github.com/sclorg/nodejs-ex.git".into(),
                revision: Some("abc123".into()),
            },
            &ImageRef::new("nodejs"),
            &ImageRef::new("out"),
            &BuildArgs::default(),
        );
        assert!(argv.contains(&"--ref=abc123".to_string()));
    }

    #[test]
    fn failed_build_is_a_result_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = ScriptedTool {
            exit_status: 1,
            seen: Mutex::new(Vec::new()),
        };
        let invoker = BuildInvoker::new(&tool, ImageRef::new("nodejs"));
        let result = invoker
            .build(
                &SourceLocation::Local(dir.path().to_path_buf()),
                "nodejs",
                "default",
                &BuildArgs::default(),
            )
            .expect("invoker itself should not fail");
        assert!(!result.succeeded());
        assert_eq!(result.image.as_str(), "nodejs-testapp-default");
        assert_eq!(tool.seen.lock().unwrap().as_slice(), ["nodejs-testapp-default"]);
    }

    #[test]
    fn missing_local_source_is_fatal() {
        let tool = ScriptedTool {
            exit_status: 0,
            seen: Mutex::new(Vec::new()),
        };
        let invoker = BuildInvoker::new(&tool, ImageRef::new("nodejs"));
        let err = invoker
            .build(
                &SourceLocation::Local(PathBuf::from("/nonexistent/shipcheck/app")),
                "nodejs",
                "default",
                &BuildArgs::default(),
            )
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(tool.seen.lock().unwrap().is_empty());
    }
}
