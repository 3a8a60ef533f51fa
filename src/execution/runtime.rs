//! Container runtime seam.
//!
//! [`ContainerRuntime`] is the narrow set of calls the harness needs from a
//! container engine. [`super::DockerClient`] implements it with bollard; tests
//! substitute an in-memory fake.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ContainerError;

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, also used as its handle.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Entrypoint command.
    pub cmd: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Bind mounts in `host:container:mode` form.
    pub binds: Vec<String>,
    /// Environment variables in `KEY=value` form.
    pub env: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            cmd: Vec::new(),
            working_dir: None,
            binds: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}

/// A command to run as a new exec inside a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// Extra environment variables in `KEY=value` form.
    pub env: Vec<String>,
}

impl ExecRequest {
    /// `/bin/bash -c <command>`: each call is a fresh login-less shell.
    pub fn bash(command: &str) -> Self {
        Self {
            cmd: vec!["/bin/bash".to_string(), "-c".to_string(), command.to_string()],
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}

/// Result of executing a command in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// `stdout` followed by `stderr`.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Minimal listing entry for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the leading `/` Docker reports.
    pub name: String,
}

/// Operations the harness performs against a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns true if the image is available locally.
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;

    /// Runs a command as a new exec and waits for it to finish.
    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, ContainerError>;

    /// Stops a container, killing it after `grace_secs`.
    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), ContainerError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError>;

    /// Lists all containers (running or not) whose name starts with `name_prefix`.
    async fn list_containers(&self, name_prefix: &str)
        -> Result<Vec<ContainerSummary>, ContainerError>;

    /// Builds an image from a gzip-compressed tar context.
    async fn build_image(
        &self,
        tag: &str,
        context: Vec<u8>,
        build_args: HashMap<String, String>,
    ) -> Result<(), ContainerError>;
}
