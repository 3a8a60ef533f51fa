//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::process::Command;

use setupbench::agent::{
    AgentEvent, AgentRuntime, ContentBlock, EventStream, SessionDriver, SessionRequest, TokenUsage,
};
use setupbench::error::{AgentSessionError, ContainerError};
use setupbench::execution::{ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ExecRequest};
use setupbench::HarnessConfig;

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    binds: Vec<(PathBuf, String)>,
    running: bool,
}

type ExecHook = Box<dyn Fn(&ExecRequest, &[(PathBuf, String)]) -> Option<ExecOutput> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    images: HashSet<String>,
    pullable: bool,
    containers: Vec<FakeContainer>,
    calls: Vec<String>,
    next_id: usize,
    fail_remove: bool,
    fail_start: bool,
    built: Vec<(String, HashMap<String, String>)>,
}

/// Container runtime that runs execs as local bash processes in the host
/// directory bind-mounted at the requested working directory.
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    exec_hook: Option<ExecHook>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            exec_hook: None,
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Images not present locally can be pulled.
    pub fn pullable(self) -> Self {
        self.state.lock().unwrap().pullable = true;
        self
    }

    /// A container left over from an earlier run.
    pub fn with_leftover(self, name: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = format!("fake-{}", state.next_id);
            state.containers.push(FakeContainer {
                id,
                name: name.to_string(),
                binds: Vec::new(),
                running: true,
            });
        }
        self
    }

    pub fn failing_start(self) -> Self {
        self.state.lock().unwrap().fail_start = true;
        self
    }

    pub fn with_exec_hook(
        mut self,
        hook: impl Fn(&ExecRequest, &[(PathBuf, String)]) -> Option<ExecOutput> + Send + Sync + 'static,
    ) -> Self {
        self.exec_hook = Some(Box::new(hook));
        self
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn built_images(&self) -> Vec<(String, HashMap<String, String>)> {
        self.state.lock().unwrap().built.clone()
    }

    fn log(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn parse_bind(bind: &str) -> (PathBuf, String) {
    let mut parts = bind.rsplitn(3, ':');
    let _mode = parts.next();
    let container = parts.next().unwrap_or_default().to_string();
    let host = parts.next().unwrap_or_default();
    (PathBuf::from(host), container)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        self.log(format!("image_exists {image}"));
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        self.log(format!("pull {image}"));
        let mut state = self.state.lock().unwrap();
        if state.pullable {
            state.images.insert(image.to_string());
            Ok(())
        } else {
            Err(ContainerError::ImageNotFound(image.to_string()))
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.log(format!("create {}", spec.name));
        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(ContainerError::Api(format!("name {} already in use", spec.name)));
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            binds: spec.binds.iter().map(|b| parse_bind(b)).collect(),
            running: false,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.log(format!("start {id}"));
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(ContainerError::Api("cannot start".to_string()));
        }
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(ContainerError::NotFound(id.to_string())),
        }
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, ContainerError> {
        self.log(format!("exec {id}"));
        let binds = {
            let state = self.state.lock().unwrap();
            match state.containers.iter().find(|c| c.id == id && c.running) {
                Some(c) => c.binds.clone(),
                None => return Err(ContainerError::NotFound(id.to_string())),
            }
        };

        if let Some(hook) = &self.exec_hook {
            if let Some(output) = hook(request, &binds) {
                return Ok(output);
            }
        }

        let workdir = request.working_dir.as_deref().unwrap_or("/testbed");
        let cwd = binds
            .iter()
            .find(|(_, container)| container == workdir)
            .map(|(host, _)| host.clone())
            .ok_or_else(|| ContainerError::Api(format!("no bind for {workdir}")))?;

        let mut cmd = Command::new(&request.cmd[0]);
        cmd.args(&request.cmd[1..])
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &request.env {
            if let Some((k, v)) = var.split_once('=') {
                cmd.env(k, v);
            }
        }
        let output = cmd.output().await?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1) as i64,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn stop_container(&self, id: &str, _grace_secs: i64) -> Result<(), ContainerError> {
        self.log(format!("stop {id}"));
        let mut state = self.state.lock().unwrap();
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(ContainerError::NotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), ContainerError> {
        self.log(format!("remove {id}"));
        let mut state = self.state.lock().unwrap();
        let pos = state
            .containers
            .iter()
            .position(|c| c.id == id || c.name == id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if state.fail_remove {
            return Err(ContainerError::Api("device or resource busy".to_string()));
        }
        state.containers.remove(pos);
        Ok(())
    }

    async fn list_containers(
        &self,
        name_prefix: &str,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        self.log(format!("list {name_prefix}"));
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|c| c.name.starts_with(name_prefix))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect())
    }

    async fn build_image(
        &self,
        tag: &str,
        context: Vec<u8>,
        build_args: HashMap<String, String>,
    ) -> Result<(), ContainerError> {
        self.log(format!("build {tag}"));
        if context.is_empty() {
            return Err(ContainerError::Build("empty context".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.images.insert(tag.to_string());
        state.built.push((tag.to_string(), build_args));
        Ok(())
    }
}

type Action = Box<dyn Fn(&Path) + Send + Sync>;

enum Behavior {
    Events(Vec<AgentEvent>),
    FailOnOpen(String),
    FailMidStream(Vec<AgentEvent>, String),
    Hang,
    HangAfter(Vec<AgentEvent>),
}

/// Agent runtime replaying a fixed script. An optional action runs in the
/// session's working directory first, standing in for the agent's work.
pub struct ScriptedAgent {
    behavior: Behavior,
    action: Option<Action>,
}

impl ScriptedAgent {
    pub fn events(events: Vec<AgentEvent>) -> Self {
        Self {
            behavior: Behavior::Events(events),
            action: None,
        }
    }

    pub fn failing_on_open(message: &str) -> Self {
        Self {
            behavior: Behavior::FailOnOpen(message.to_string()),
            action: None,
        }
    }

    pub fn failing_mid_stream(events: Vec<AgentEvent>, message: &str) -> Self {
        Self {
            behavior: Behavior::FailMidStream(events, message.to_string()),
            action: None,
        }
    }

    pub fn hanging() -> Self {
        Self {
            behavior: Behavior::Hang,
            action: None,
        }
    }

    /// Replays `events`, then never yields again.
    pub fn hanging_after(events: Vec<AgentEvent>) -> Self {
        Self {
            behavior: Behavior::HangAfter(events),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    pub fn into_driver(self) -> SessionDriver {
        SessionDriver::new(Arc::new(self))
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: SessionRequest) -> Result<EventStream, AgentSessionError> {
        if let Some(action) = &self.action {
            action(&request.working_dir);
        }
        match &self.behavior {
            Behavior::Events(events) => {
                let items: Vec<_> = events.iter().cloned().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Behavior::FailOnOpen(message) => Err(AgentSessionError::Launch {
                program: "scripted".to_string(),
                reason: message.clone(),
            }),
            Behavior::FailMidStream(events, message) => {
                let mut items: Vec<_> = events.iter().cloned().map(Ok).collect();
                items.push(Err(AgentSessionError::Stream(message.clone())));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Behavior::Hang => Ok(Box::pin(futures::stream::pending::<
                Result<AgentEvent, AgentSessionError>,
            >())),
            Behavior::HangAfter(events) => {
                let items: Vec<Result<AgentEvent, AgentSessionError>> =
                    events.iter().cloned().map(Ok).collect();
                Ok(Box::pin(
                    futures::stream::iter(items).chain(futures::stream::pending()),
                ))
            }
        }
    }
}

/// One assistant turn running a Bash command, then a result event.
pub fn bash_session(command: &str, tokens: u64) -> Vec<AgentEvent> {
    vec![
        AgentEvent::Assistant {
            blocks: vec![
                ContentBlock::Text("Running setup".to_string()),
                ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "Bash".to_string(),
                    input: json!({ "command": command }),
                },
            ],
        },
        AgentEvent::ToolStarted {
            id: "toolu_1".to_string(),
            name: "Bash".to_string(),
            input: json!({ "command": command }),
        },
        AgentEvent::ToolFinished {
            id: "toolu_1".to_string(),
            name: "Bash".to_string(),
            output: json!("ok"),
            error: None,
        },
        AgentEvent::Assistant {
            blocks: vec![ContentBlock::Text("Done".to_string())],
        },
        AgentEvent::Result {
            usage: TokenUsage {
                input_tokens: tokens,
                ..TokenUsage::default()
            },
            is_error: false,
            num_turns: 2,
        },
    ]
}

/// Writes a task file into `dir` and returns its path.
pub fn write_task(
    dir: &Path,
    instance_id: &str,
    task_type: &str,
    base_image: &str,
    success_command: &str,
) -> PathBuf {
    let path = dir.join(format!("{instance_id}.json"));
    let task = json!({
        "instance_id": instance_id,
        "task_type": task_type,
        "base_image": base_image,
        "problem_statement": format!("Set up {instance_id}"),
        "success_command": success_command,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&task).unwrap()).unwrap();
    path
}

/// Config writing under `root/out` with no pause and no fixture roots.
pub fn test_config(root: &Path) -> HarnessConfig {
    HarnessConfig::new()
        .with_output_dir(root.join("out"))
        .with_pause_secs(0)
        .with_fixture_roots(vec![root.join("SetupBench")])
        .with_validation_timeout(30)
        .with_timeout(60)
}
