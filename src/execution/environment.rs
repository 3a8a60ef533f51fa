//! Execution environment lifecycle.
//!
//! An [`Environment`] is one running container bound to one task. It is
//! acquired with [`EnvironmentManager::provision`] and must be handed back to
//! [`EnvironmentManager::release`] exactly once; `release` takes it by value.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
use super::{NAME_PREFIX, STOP_GRACE_SECS, WORKSPACE_MOUNT};
use crate::error::{ContainerError, ProvisionError};

/// Status of a managed environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentStatus {
    /// Container is being created.
    Pending,
    /// Container is running and accepts execs.
    Running,
    /// Container was stopped and removed.
    Released,
    /// Teardown failed; the container may still exist.
    Leaked(String),
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentStatus::Pending => write!(f, "pending"),
            EnvironmentStatus::Running => write!(f, "running"),
            EnvironmentStatus::Released => write!(f, "released"),
            EnvironmentStatus::Leaked(msg) => write!(f, "leaked: {}", msg),
        }
    }
}

/// Extra bind mount for an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
        }
    }

    /// Docker bind string, always read-write.
    pub fn to_bind(&self) -> String {
        format!("{}:{}:rw", self.host_path.display(), self.container_path)
    }
}

/// A running container owned by one task.
#[derive(Debug)]
pub struct Environment {
    id: String,
    name: String,
    image: String,
    instance_id: String,
    workspace: PathBuf,
    status: EnvironmentStatus,
}

impl Environment {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Host directory mounted at `/testbed`.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn status(&self) -> &EnvironmentStatus {
        &self.status
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if matches!(
            self.status,
            EnvironmentStatus::Pending | EnvironmentStatus::Running
        ) {
            warn!(
                container = %self.name,
                instance_id = %self.instance_id,
                "Environment was dropped without being released"
            );
        }
    }
}

/// Result of tearing down an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Teardown failed. Logged and counted, never changes a verdict.
    TeardownWarning(String),
}

impl ReleaseOutcome {
    pub fn is_leak(&self) -> bool {
        matches!(self, ReleaseOutcome::TeardownWarning(_))
    }
}

/// Provisions, executes in, and tears down environments.
pub struct EnvironmentManager {
    runtime: Arc<dyn ContainerRuntime>,
    name_prefix: String,
    leaked: AtomicUsize,
}

impl EnvironmentManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            name_prefix: NAME_PREFIX.to_string(),
            leaked: AtomicUsize::new(0),
        }
    }

    /// Sets the prefix used for new container names.
    ///
    /// `sweep` always uses the shared harness prefix, so every custom prefix
    /// should start with it.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Container name for an instance under this manager's prefix.
    pub fn container_name(&self, instance_id: &str) -> String {
        container_name(&self.name_prefix, instance_id)
    }

    /// Creates and starts a container for one task.
    ///
    /// The image is pulled if it is not cached. A stale container with the
    /// same name is removed first. On failure nothing is left behind.
    pub async fn provision(
        &self,
        image: &str,
        workspace: &Path,
        instance_id: &str,
        extra_mounts: &[Mount],
    ) -> Result<Environment, ProvisionError> {
        let name = self.container_name(instance_id);
        info!(container = %name, image = %image, "Provisioning environment");

        let present = self.runtime.image_exists(image).await?;
        if !present {
            info!(image = %image, "Pulling image");
            self.runtime
                .pull_image(image)
                .await
                .map_err(|e| ProvisionError::ImageUnavailable {
                    image: image.to_string(),
                    reason: e.to_string(),
                })?;
        }

        match self.runtime.remove_container(&name, true).await {
            Ok(()) => debug!(container = %name, "Removed stale container"),
            Err(ContainerError::NotFound(_)) => {}
            Err(e) => debug!(container = %name, error = %e, "Stale container removal failed"),
        }

        let workspace = std::fs::canonicalize(workspace)?;
        let mut spec = ContainerSpec::new(&name, image)
            .with_cmd(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ])
            .with_working_dir(WORKSPACE_MOUNT)
            .with_bind(Mount::new(&workspace, WORKSPACE_MOUNT).to_bind());
        for mount in extra_mounts {
            spec = spec.with_bind(mount.to_bind());
        }

        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| ProvisionError::StartFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let mut env = Environment {
            id,
            name,
            image: image.to_string(),
            instance_id: instance_id.to_string(),
            workspace,
            status: EnvironmentStatus::Pending,
        };

        if let Err(e) = self.runtime.start_container(&env.id).await {
            if let Err(rm) = self.runtime.remove_container(&env.id, true).await {
                warn!(container = %env.name, error = %rm, "Failed to remove unstarted container");
            }
            env.status = EnvironmentStatus::Released;
            return Err(ProvisionError::StartFailed {
                name: env.name.clone(),
                reason: e.to_string(),
            });
        }

        env.status = EnvironmentStatus::Running;
        info!(container = %env.name, id = %env.id, "Environment running");
        Ok(env)
    }

    /// Runs `/bin/bash -c <command>` as a new exec in the environment.
    pub async fn exec(
        &self,
        env: &Environment,
        command: &str,
        workdir: Option<&str>,
        env_vars: &[String],
    ) -> Result<ExecOutput, ContainerError> {
        if env.status != EnvironmentStatus::Running {
            return Err(ContainerError::Api(format!(
                "Cannot exec in environment with {} state",
                env.status
            )));
        }

        let mut request = ExecRequest::bash(command).with_env(env_vars.to_vec());
        if let Some(dir) = workdir {
            request = request.with_working_dir(dir);
        }
        self.runtime.exec(&env.id, &request).await
    }

    /// Stops and force-removes the environment.
    ///
    /// Failures are logged, counted as leaks, and returned as a warning.
    pub async fn release(&self, mut env: Environment) -> ReleaseOutcome {
        if let Err(e) = self.runtime.stop_container(&env.id, STOP_GRACE_SECS).await {
            debug!(container = %env.name, error = %e, "Stop failed, forcing removal");
        }

        match self.runtime.remove_container(&env.id, true).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => {
                env.status = EnvironmentStatus::Released;
                info!(container = %env.name, "Environment released");
                ReleaseOutcome::Released
            }
            Err(e) => {
                let msg = e.to_string();
                warn!(container = %env.name, error = %msg, "Environment teardown failed");
                self.leaked.fetch_add(1, Ordering::SeqCst);
                env.status = EnvironmentStatus::Leaked(msg.clone());
                ReleaseOutcome::TeardownWarning(msg)
            }
        }
    }

    /// Removes every container whose name starts with the harness prefix.
    ///
    /// Returns how many were removed. Individual failures are warnings.
    pub async fn sweep(&self) -> Result<usize, ContainerError> {
        let leftovers = self.runtime.list_containers(NAME_PREFIX).await?;
        if leftovers.is_empty() {
            debug!("No leftover environments to sweep");
            return Ok(0);
        }

        let mut removed = 0;
        for container in leftovers {
            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => {
                    info!(container = %container.name, "Swept leftover environment");
                    removed += 1;
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to sweep environment");
                }
            }
        }
        Ok(removed)
    }

    /// Number of environments whose teardown failed.
    pub fn leaked_count(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }
}

/// Builds a valid container name from a prefix and an instance id.
///
/// Characters Docker does not accept in names are replaced with `-`.
pub fn container_name(prefix: &str, instance_id: &str) -> String {
    let safe = match Regex::new(r"[^a-zA-Z0-9_.-]") {
        Ok(re) => re.replace_all(instance_id, "-").to_string(),
        Err(_) => instance_id.replace(['/', ' ', ':'], "-"),
    };
    format!("{prefix}{safe}")
}
