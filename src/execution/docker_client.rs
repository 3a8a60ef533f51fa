//! Docker API wrapper using the bollard crate.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::debug;

use super::runtime::{ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ExecRequest};
use crate::error::ContainerError;

/// Docker client wrapper for container operations.
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::Unavailable` if the daemon socket cannot be used.
    pub fn new() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Pings the daemon.
    pub async fn ping(&self) -> Result<(), ContainerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Raw exec output per stream. Chunks can split multibyte characters, so
/// decoding happens once at the end.
#[derive(Debug, Default)]
struct ExecBuffers {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ExecBuffers {
    fn push(&mut self, chunk: LogOutput) {
        match chunk {
            LogOutput::StdOut { message } => self.stdout.extend_from_slice(&message),
            LogOutput::StdErr { message } => self.stderr.extend_from_slice(&message),
            _ => {}
        }
    }

    fn decode(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ContainerError::Api(format!("Failed to inspect image: {e}"))),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::ImageNotFound(image.to_string())
                } else {
                    ContainerError::Api(format!("Failed to pull image: {e}"))
                }
            })?;
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            working_dir: spec.working_dir.clone(),
            host_config: Some(host_config),
            tty: Some(false),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::ImageNotFound(spec.image.clone())
                } else {
                    ContainerError::Api(format!("Failed to create container: {e}"))
                }
            })?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to start container: {e}")))?;

        Ok(())
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, ContainerError> {
        let exec_options = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            working_dir: request.working_dir.clone(),
            env: if request.env.is_empty() {
                None
            } else {
                Some(request.env.clone())
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_options)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::NotFound(id.to_string())
                } else {
                    ContainerError::Api(format!("Failed to create exec: {e}"))
                }
            })?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to start exec: {e}")))?;

        let mut buffers = ExecBuffers::default();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(chunk) => buffers.push(chunk),
                    Err(e) => {
                        return Err(ContainerError::Api(format!("Error reading output: {e}")));
                    }
                }
            }
        }
        let (stdout, stderr) = buffers.decode();

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to inspect exec: {e}")))?;

        Ok(ExecOutput {
            exit_code: exec_info.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), ContainerError> {
        let options = StopContainerOptions { t: grace_secs };

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::NotFound(id.to_string())
                } else {
                    ContainerError::Api(format!("Failed to stop container: {e}"))
                }
            })?;

        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ContainerError::NotFound(id.to_string())
                } else {
                    ContainerError::Api(format!("Failed to remove container: {e}"))
                }
            })?;

        Ok(())
    }

    async fn list_containers(
        &self,
        name_prefix: &str,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        // The daemon's name filter is a substring match; narrow it to a prefix here.
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_prefix.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| ContainerError::Api(format!("Failed to list containers: {e}")))?;

        let summaries = containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .find(|n| n.starts_with(name_prefix))?;
                Some(ContainerSummary { id, name })
            })
            .collect();

        Ok(summaries)
    }

    async fn build_image(
        &self,
        tag: &str,
        context: Vec<u8>,
        build_args: HashMap<String, String>,
    ) -> Result<(), ContainerError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            buildargs: build_args,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(context.into()));

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| ContainerError::Build(e.to_string()))?;
            if let Some(error) = info.error {
                return Err(ContainerError::Build(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(tag = tag, "{}", line);
                }
            }
        }

        Ok(())
    }
}
