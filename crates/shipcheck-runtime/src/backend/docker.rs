//! Container runtime backed by the `docker` command line.

use std::collections::{BTreeMap, HashMap};
use std::process::Child;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use shipcheck_common::constants::{DEFAULT_LAUNCH_GRACE_MS, HARNESS_LABEL};
use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::{ContainerId, ImageRef};

use super::{ContainerInfo, ContainerRuntime, RuntimeArgs};
use crate::command::{self, CommandOutput};

/// Runtime that shells out to a docker-compatible CLI.
///
/// `start` spawns `docker run -d` in the background. The launcher process
/// is kept so that [`inspect`](ContainerRuntime::inspect) can report a
/// launch that failed before any container appeared, and so that
/// [`cancel_launch`](ContainerRuntime::cancel_launch) can reap it.
pub struct DockerCli {
    binary: String,
    launch_grace: Duration,
    launches: Mutex<HashMap<String, Child>>,
}

const LAUNCHER_POLL: Duration = Duration::from_millis(50);

impl DockerCli {
    /// Creates a runtime that runs the given binary (`docker`, `podman`, ...).
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            launch_grace: Duration::from_millis(DEFAULT_LAUNCH_GRACE_MS),
            launches: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how long a cancelled launch may take to finish before its
    /// launcher is killed.
    #[must_use]
    pub const fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }

    /// Assembles the `run` arguments for a detached launch.
    #[must_use]
    pub fn run_args(image: &ImageRef, name: &str, args: &RuntimeArgs) -> Vec<String> {
        let mut argv = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--label".to_string(),
            format!("{HARNESS_LABEL}=1"),
        ];
        for (key, value) in &args.env {
            argv.push("-e".into());
            argv.push(format!("{key}={value}"));
        }
        argv.extend(args.flags.iter().cloned());
        argv.push(image.to_string());
        argv.extend(args.command.iter().cloned());
        argv
    }

    fn docker<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        command::run(&self.binary, args)
    }

    fn lock_launches(&self) -> Result<MutexGuard<'_, HashMap<String, Child>>> {
        self.launches.lock().map_err(|_| HarnessError::Config {
            message: "launcher table lock poisoned".into(),
        })
    }

    /// Reaps the launcher for `name` if it has exited.
    fn check_launch(&self, name: &str) -> Result<()> {
        let mut launches = self.lock_launches()?;
        let exited = match launches.get_mut(name) {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        };
        if !exited {
            return Ok(());
        }
        let Some(child) = launches.remove(name) else {
            return Ok(());
        };
        drop(launches);

        let out = command::collect(child, &self.binary)?;
        if out.success() {
            tracing::debug!(name, "launcher exited cleanly");
            return Ok(());
        }
        Err(HarnessError::LaunchFailed {
            name: name.to_string(),
            message: out.stderr.trim().to_string(),
        })
    }

    /// Lets a pending launcher finish within the grace period, then kills it.
    fn reap_launcher(&self, name: &str, mut child: Child) {
        let deadline = Instant::now() + self.launch_grace;
        while matches!(child.try_wait(), Ok(None)) && Instant::now() < deadline {
            thread::sleep(LAUNCHER_POLL);
        }
        if matches!(child.try_wait(), Ok(None)) {
            tracing::warn!(name, pid = child.id(), "launcher still running, killing it");
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}

impl Drop for DockerCli {
    fn drop(&mut self) {
        if let Ok(mut launches) = self.launches.lock() {
            for (name, mut child) in launches.drain() {
                if !matches!(child.try_wait(), Ok(Some(_))) {
                    tracing::debug!(name = %name, "killing unfinished launcher");
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn start(&self, image: &ImageRef, name: &str, args: &RuntimeArgs) -> Result<()> {
        let argv = Self::run_args(image, name, args);
        let child = command::spawn(&self.binary, &argv)?;
        tracing::info!(%image, name, pid = child.id(), "container launch requested");
        let _ = self.lock_launches()?.insert(name.to_string(), child);
        Ok(())
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.check_launch(name)?;
        let out = self.docker(["inspect", "--type", "container", name])?;
        if !out.success() {
            if is_missing(&out.stderr) {
                return Ok(None);
            }
            return Err(HarnessError::Runtime {
                operation: "inspect",
                message: out.stderr.trim().to_string(),
            });
        }
        parse_inspect(&out.stdout)
    }

    fn logs(&self, id: &ContainerId) -> Result<String> {
        let out = self.docker(["logs", id.as_str()])?;
        if !out.success() {
            return Err(HarnessError::Runtime {
                operation: "logs",
                message: out.stderr.trim().to_string(),
            });
        }
        Ok(out.combined())
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<CommandOutput> {
        let mut argv = vec!["exec".to_string(), id.to_string()];
        argv.extend(cmd.iter().cloned());
        self.docker(&argv)
    }

    fn run_once(&self, image: &ImageRef, cmd: &[String]) -> Result<CommandOutput> {
        let mut argv = vec!["run".to_string(), "--rm".to_string(), image.to_string()];
        argv.extend(cmd.iter().cloned());
        self.docker(&argv)
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        let out = self.docker(["stop", id.as_str()])?;
        if out.success() || is_missing(&out.stderr) {
            return Ok(());
        }
        Err(HarnessError::Runtime {
            operation: "stop",
            message: out.stderr.trim().to_string(),
        })
    }

    fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        let out = if force {
            self.docker(["rm", "-f", "-v", id.as_str()])?
        } else {
            self.docker(["rm", "-v", id.as_str()])?
        };
        if out.success() || is_missing(&out.stderr) {
            return Ok(());
        }
        Err(HarnessError::Runtime {
            operation: "rm",
            message: out.stderr.trim().to_string(),
        })
    }

    fn cancel_launch(&self, name: &str) -> Result<()> {
        let launcher = self.lock_launches()?.remove(name);
        if let Some(child) = launcher {
            self.reap_launcher(name, child);
        }
        // Names are unique per launch, so whatever exists under it is ours.
        let out = self.docker(["rm", "-f", "-v", name])?;
        if out.success() || is_missing(&out.stderr) {
            tracing::debug!(name, "abandoned launch cleared");
            return Ok(());
        }
        Err(HarnessError::Runtime {
            operation: "rm",
            message: out.stderr.trim().to_string(),
        })
    }

    fn remove_image(&self, image: &ImageRef, force: bool) -> Result<()> {
        let out = if force {
            self.docker(["rmi", "-f", image.as_str()])?
        } else {
            self.docker(["rmi", image.as_str()])?
        };
        if out.success() || is_missing(&out.stderr) {
            return Ok(());
        }
        let stderr = out.stderr.to_ascii_lowercase();
        if stderr.contains("conflict") || stderr.contains("is being used") {
            return Err(HarnessError::ImageInUse {
                image: image.to_string(),
            });
        }
        Err(HarnessError::Runtime {
            operation: "rmi",
            message: out.stderr.trim().to_string(),
        })
    }

    fn image_id(&self, image: &ImageRef) -> Result<Option<String>> {
        let out = self.docker(["image", "inspect", "--format", "{{.Id}}", image.as_str()])?;
        if out.success() {
            let id = out.stdout.trim();
            return Ok((!id.is_empty()).then(|| id.to_string()));
        }
        if is_missing(&out.stderr) {
            return Ok(None);
        }
        Err(HarnessError::Runtime {
            operation: "image inspect",
            message: out.stderr.trim().to_string(),
        })
    }

    fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        let out = self.docker(["image", "inspect", image.as_str()])?;
        Ok(out.success())
    }
}

/// Returns whether runtime stderr reports an unknown object.
fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such") || stderr.contains("not found")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    state: InspectState,
    #[serde(default)]
    network_settings: Option<NetworkSettings>,
    #[serde(default)]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    networks: Option<BTreeMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Parses `docker inspect` JSON output into [`ContainerInfo`].
///
/// # Errors
///
/// Returns an error if the output is not valid inspect JSON.
pub fn parse_inspect(json: &str) -> Result<Option<ContainerInfo>> {
    let records: Vec<InspectRecord> = serde_json::from_str(json)?;
    let Some(record) = records.into_iter().next() else {
        return Ok(None);
    };

    let address = record.network_settings.and_then(|ns| {
        if ns.ip_address.is_empty() {
            ns.networks?
                .into_values()
                .map(|n| n.ip_address)
                .find(|ip| !ip.is_empty())
        } else {
            Some(ns.ip_address)
        }
    });

    Ok(Some(ContainerInfo {
        id: ContainerId::new(record.id),
        address,
        labels: record.config.and_then(|c| c.labels).unwrap_or_default(),
        status: record.state.status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING: &str = r#"[{
        "Id": "4f66ad9a0b2e8a1c",
        "State": { "Status": "running", "Running": true },
        "Config": { "Labels": { "io.shipcheck.harness": "1" } },
        "NetworkSettings": { "IPAddress": "172.17.0.2", "Networks": {} }
    }]"#;

    #[test]
    fn parse_running_container() {
        let info = parse_inspect(RUNNING).unwrap().expect("one record");
        assert_eq!(info.id.as_str(), "4f66ad9a0b2e8a1c");
        assert_eq!(info.address.as_deref(), Some("172.17.0.2"));
        assert_eq!(info.status, "running");
        assert_eq!(info.labels.get(HARNESS_LABEL).map(String::as_str), Some("1"));
    }

    #[test]
    fn parse_falls_back_to_network_address() {
        let json = r#"[{
            "Id": "abc",
            "State": { "Status": "running" },
            "Config": { "Labels": null },
            "NetworkSettings": {
                "IPAddress": "",
                "Networks": { "podman": { "IPAddress": "10.88.0.5" } }
            }
        }]"#;
        let info = parse_inspect(json).unwrap().expect("one record");
        assert_eq!(info.address.as_deref(), Some("10.88.0.5"));
        assert!(info.labels.is_empty());
    }

    #[test]
    fn parse_created_container_has_no_address() {
        let json = r#"[{ "Id": "abc", "State": { "Status": "created" },
                         "NetworkSettings": { "IPAddress": "" } }]"#;
        let info = parse_inspect(json).unwrap().expect("one record");
        assert!(info.address.is_none());
        assert_eq!(info.status, "created");
    }

    #[test]
    fn parse_empty_array_is_not_observable() {
        assert!(parse_inspect("[]").unwrap().is_none());
    }

    #[test]
    fn parse_garbage_is_an_error() {
        assert!(parse_inspect("not json").is_err());
    }

    #[test]
    fn run_args_are_detached_and_labelled() {
        let args = RuntimeArgs::default()
            .env("NODE_ENV", "production")
            .flag("--user=1001");
        let argv = DockerCli::run_args(&ImageRef::new("app"), "app-1234", &args);
        assert_eq!(
            argv,
            vec![
                "run",
                "-d",
                "--name",
                "app-1234",
                "--label",
                "io.shipcheck.harness=1",
                "-e",
                "NODE_ENV=production",
                "--user=1001",
                "app",
            ]
        );
    }

    /// Writes an executable stand-in for the runtime CLI into `dir`.
    ///
    /// Every invocation is appended to `dir/calls`. A container exists
    /// while `dir/container-<name>` does. `run_body` runs for `run` with
    /// `$name` set.
    #[cfg(unix)]
    fn scripted_cli(dir: &tempfile::TempDir, run_body: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("docker");
        let script = format!(
            r#"#!/bin/sh
dir="$(dirname "$0")"
echo "$*" >> "$dir/calls"
case "$1" in
run)
    name="$4"
    {run_body}
    ;;
inspect)
    if [ -f "$dir/container-$4" ]; then
        printf '[{{"Id":"cid-%s","State":{{"Status":"running"}}}}]' "$4"
    else
        echo "Error: No such container: $4" >&2
        exit 1
    fi
    ;;
rm)
    for last; do :; done
    rm -f "$dir/container-$last"
    ;;
esac
"#
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(path.to_string_lossy().into_owned())
    }

    #[cfg(unix)]
    fn calls(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn failed_launcher_surfaces_as_launch_failed() {
        let dir = tempfile::tempdir().unwrap();
        let cli = scripted_cli(
            &dir,
            r#"echo "Unable to find image 'app:latest' locally" >&2; exit 125"#,
        );
        cli.start(&ImageRef::new("app"), "app-1", &RuntimeArgs::default())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match cli.inspect("app-1") {
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(other) => panic!("expected a launch failure, got {other:?}"),
                Err(e) => break e,
            }
        };
        match err {
            HarnessError::LaunchFailed { name, message } => {
                assert_eq!(name, "app-1");
                assert!(message.contains("Unable to find image"), "{message}");
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_launch_never_leaves_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let cli = scripted_cli(&dir, r#"sleep 1; touch "$dir/container-$name""#)
            .with_launch_grace(Duration::ZERO);
        cli.start(&ImageRef::new("app"), "app-1", &RuntimeArgs::default())
            .unwrap();
        assert!(cli.inspect("app-1").unwrap().is_none());

        cli.cancel_launch("app-1").unwrap();
        thread::sleep(Duration::from_millis(1500));

        assert!(!dir.path().join("container-app-1").exists());
        assert!(calls(&dir).contains(&"rm -f -v app-1".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn late_container_is_removed_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let cli = scripted_cli(&dir, r#"sleep 0.3; touch "$dir/container-$name""#);
        cli.start(&ImageRef::new("app"), "app-1", &RuntimeArgs::default())
            .unwrap();
        assert!(cli.inspect("app-1").unwrap().is_none());

        cli.cancel_launch("app-1").unwrap();

        assert!(!dir.path().join("container-app-1").exists());
        assert!(cli.inspect("app-1").unwrap().is_none());
    }

    #[test]
    fn missing_object_detection() {
        assert!(is_missing("Error: No such container: abc"));
        assert!(is_missing("Error response from daemon: No such image: x:latest"));
        assert!(!is_missing("permission denied"));
    }
}
