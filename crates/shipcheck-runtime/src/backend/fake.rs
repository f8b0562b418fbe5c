//! In-memory runtime used by this crate's unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use shipcheck_common::error::{HarnessError, Result};
use shipcheck_common::types::{ContainerId, ImageRef};

use super::{ContainerInfo, ContainerRuntime, RuntimeArgs};
use crate::command::CommandOutput;

/// Scripted reply to one `inspect` call.
pub enum Reply {
    Missing,
    Found(Option<&'static str>, &'static str),
    LaunchFailed(&'static str),
    Broken,
}

#[derive(Default)]
pub struct FakeRuntime {
    pub replies: Mutex<VecDeque<Reply>>,
    pub calls: Mutex<Vec<String>>,
    pub image_in_use_once: Mutex<bool>,
    pub fail_stop: bool,
}

impl FakeRuntime {
    pub fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn start(&self, image: &ImageRef, name: &str, _args: &RuntimeArgs) -> Result<()> {
        self.record(format!("start {image} {name}"));
        Ok(())
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        self.record(format!("inspect {name}"));
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Missing);
        match reply {
            Reply::Missing => Ok(None),
            Reply::Found(address, status) => Ok(Some(ContainerInfo {
                id: ContainerId::new(format!("id-{name}")),
                address: address.map(str::to_string),
                labels: BTreeMap::new(),
                status: status.to_string(),
            })),
            Reply::LaunchFailed(message) => Err(HarnessError::LaunchFailed {
                name: name.to_string(),
                message: message.to_string(),
            }),
            Reply::Broken => Err(HarnessError::Runtime {
                operation: "inspect",
                message: "daemon hiccup".into(),
            }),
        }
    }

    fn logs(&self, id: &ContainerId) -> Result<String> {
        self.record(format!("logs {id}"));
        Ok(String::new())
    }

    fn exec(&self, id: &ContainerId, cmd: &[String]) -> Result<CommandOutput> {
        self.record(format!("exec {id} {}", cmd.join(" ")));
        Ok(CommandOutput::default())
    }

    fn run_once(&self, image: &ImageRef, cmd: &[String]) -> Result<CommandOutput> {
        self.record(format!("run_once {image} {}", cmd.join(" ")));
        Ok(CommandOutput::default())
    }

    fn stop(&self, id: &ContainerId) -> Result<()> {
        self.record(format!("stop {id}"));
        if self.fail_stop {
            return Err(HarnessError::Runtime {
                operation: "stop",
                message: "timeout".into(),
            });
        }
        Ok(())
    }

    fn remove_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        self.record(format!("rm{} {id}", if force { " -f" } else { "" }));
        Ok(())
    }

    fn cancel_launch(&self, name: &str) -> Result<()> {
        self.record(format!("cancel {name}"));
        Ok(())
    }

    fn remove_image(&self, image: &ImageRef, force: bool) -> Result<()> {
        self.record(format!("rmi{} {image}", if force { " -f" } else { "" }));
        let mut in_use = self.image_in_use_once.lock().unwrap();
        if *in_use && !force {
            *in_use = false;
            return Err(HarnessError::ImageInUse {
                image: image.to_string(),
            });
        }
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
