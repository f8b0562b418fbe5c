//! External command execution with captured output.

use std::ffi::OsStr;
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};
use shipcheck_common::error::{HarnessError, Result};

/// Output captured from a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command (`-1` if killed by a signal).
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout followed by stderr.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs `program` with `args` to completion, capturing stdout and stderr.
///
/// A non-zero exit status is not an error; only a failure to start the
/// program is.
///
/// # Errors
///
/// Returns [`HarnessError::ToolUnavailable`] if the program cannot be spawned.
pub fn run<I, S>(program: &str, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    let _ = cmd.args(args).stdin(Stdio::null());
    tracing::debug!(cmd = ?cmd, "running command");

    let output = cmd.output().map_err(|e| HarnessError::ToolUnavailable {
        tool: program.to_string(),
        source: e,
    })?;

    let out = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    };
    tracing::debug!(program, exit_code = out.exit_code, "command finished");
    Ok(out)
}

/// Starts `program` in the background with piped stdout and stderr.
///
/// # Errors
///
/// Returns [`HarnessError::ToolUnavailable`] if the program cannot be spawned.
pub fn spawn<I, S>(program: &str, args: I) -> Result<Child>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    let _ = cmd
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    tracing::debug!(cmd = ?cmd, "spawning command");

    cmd.spawn().map_err(|e| HarnessError::ToolUnavailable {
        tool: program.to_string(),
        source: e,
    })
}

/// Collects the output of a background child that has already exited.
///
/// # Errors
///
/// Returns an error if the child's pipes cannot be read.
pub fn collect(child: Child, program: &str) -> Result<CommandOutput> {
    let output = child.wait_with_output().map_err(|e| HarnessError::Io {
        path: program.into(),
        source: e,
    })?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
