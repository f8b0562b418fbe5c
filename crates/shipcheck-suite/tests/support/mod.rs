//! Recording fakes and a stub HTTP server shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use shipcheck_common::config::{HarnessConfig, RetryPolicy};
use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::{ContainerId, ImageRef, SourceLocation};
use shipcheck_runtime::backend::{ContainerInfo, ContainerRuntime, RuntimeArgs};
use shipcheck_runtime::build::{BuildArgs, BuildOutput, BuildTool};
use shipcheck_runtime::command::CommandOutput;

/// Build tool that answers with a fixed log and exit status.
pub struct RecordingTool {
    pub exit_status: i32,
    pub log: String,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingTool {
    pub fn new(exit_status: i32, log: &str) -> Self {
        Self {
            exit_status,
            log: log.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl BuildTool for RecordingTool {
    fn invoke(
        &self,
        _source: &SourceLocation,
        base_image: &ImageRef,
        output: &ImageRef,
        args: &BuildArgs,
    ) -> Result<BuildOutput> {
        self.calls.lock().unwrap().push(format!(
            "build {base_image} {output} incremental={}",
            args.incremental
        ));
        Ok(BuildOutput {
            log: self.log.clone(),
            exit_status: self.exit_status,
        })
    }
}

/// How the fake runtime behaves.
#[derive(Clone)]
pub struct Behavior {
    /// Address reported once the container is observable.
    pub address: Option<&'static str>,
    /// Whether `inspect` ever finds the container.
    pub observable: bool,
    /// Whether `start` is refused.
    pub refuse_start: bool,
    /// Output of `exec`.
    pub exec_output: &'static str,
    /// Make `exec` fail as if the runtime binary vanished.
    pub exec_fatal: bool,
    /// Container log.
    pub logs: &'static str,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            address: Some("127.0.0.1"),
            observable: true,
            refuse_start: false,
            exec_output: "NODE_ENV=production\nHOME=/opt/app-root/src\n",
            exec_fatal: false,
            logs: "Server running on port 8080\n",
        }
    }
}

/// Container runtime that records every call.
#[derive(Default)]
pub struct RecordingRuntime {
    pub behavior: Behavior,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose first word is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(verb))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for RecordingRuntime {
    fn start(&self, image: &ImageRef, name: &str, _args: &RuntimeArgs) -> Result<()> {
        self.record(format!("start {image} {name}"));
        if self.behavior.refuse_start {
            return Err(HarnessError::Runtime {
                operation: "run",
                message: "pull access denied".into(),
            });
        }
        Ok(())
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.record(format!("inspect {name}"));
        if !self.behavior.observable {
            return Ok(None);
        }
        Ok(Some(ContainerInfo {
            id: ContainerId::new(format!("id-{name}")),
            address: self.behavior.address.map(str::to_string),
            labels: BTreeMap::new(),
            status: "running".into(),
        }))
    }

    fn logs(&self, id: &ContainerId) -> Result<String> {
        self.record(format!("logs {id}"));
        Ok(self.behavior.logs.into())
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<CommandOutput> {
        self.record(format!("exec {id} {}", cmd.join(" ")));
        if self.behavior.exec_fatal {
            return Err(HarnessError::FatalSetup {
                message: "container runtime disappeared".into(),
            });
        }
        Ok(CommandOutput {
            stdout: self.behavior.exec_output.into(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    fn run_once(&self, image: &ImageRef, cmd: &[String]) -> Result<CommandOutput> {
        self.record(format!("run_once {image} {}", cmd.join(" ")));
        Ok(CommandOutput {
            stdout: "12\n".into(),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("stop {id}"));
        Ok(())
    }

    fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(if force {
            format!("rm -f {id}")
        } else {
            format!("rm {id}")
        });
        Ok(())
    }

    fn cancel_launch(&self, name: &str) -> Result<()> {
        self.record(format!("cancel {name}"));
        Ok(())
    }

    fn remove_image(&self, image: &ImageRef, force: bool) -> Result<()> {
        self.record(if force {
            format!("rmi -f {image}")
        } else {
            format!("rmi {image}")
        });
        Ok(())
    }

    fn image_id(&self, image: &ImageRef) -> Result<Option<String>> {
        self.record(format!("image_id {image}"));
        Ok(Some(format!("sha256:{image}")))
    }

    fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        self.record(format!("image_exists {image}"));
        Ok(true)
    }
}

/// Configuration with short retry budgets, probing `port`.
pub fn fast_config(port: u16) -> HarnessConfig {
    let mut config = HarnessConfig::new(ImageRef::new("nodejs"));
    config.readiness = RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    };
    config.probe = RetryPolicy {
        max_attempts: 3,
        interval: Duration::from_millis(10),
    };
    config.app_port = port;
    config
}

/// Serves exactly one HTTP response on an ephemeral local port.
pub fn stub_server(status_line: &'static str, body: &'static str) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0_u8; 2048];
        let _ = stream.read(&mut buf).unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
    });
    (port, handle)
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
