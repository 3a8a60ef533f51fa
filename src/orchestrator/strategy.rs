//! How the agent is placed relative to the task environment.
//!
//! [`HostDriven`] runs the agent CLI on the host against the workspace
//! directory, which is also bind-mounted into the environment.
//! [`InEnvironment`] builds a derived image carrying the agent CLI and this
//! binary, and runs the hidden `session` subcommand inside the container;
//! its logs land on the mounted log directory and its outcome is read back
//! from `session.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{SessionDriver, SessionOutcome};
use crate::config::API_KEY_ENV;
use crate::error::{AgentSessionError, ProvisionError};
use crate::execution::{
    build_derived_image, Environment, EnvironmentManager, Mount, AGENT_NAME_PREFIX, LOG_MOUNT,
    NAME_PREFIX, WORKSPACE_MOUNT,
};
use crate::recorder::{LogLevel, TaskLogger};
use crate::task::Task;
use crate::utils::truncate;

use super::session::{SESSION_REPORT_FILE, TASK_COPY_FILE};

/// Selects an [`ExecutionStrategy`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    HostDriven,
    InEnvironment,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostDriven => write!(f, "host-driven"),
            Self::InEnvironment => write!(f, "in-environment"),
        }
    }
}

/// Everything a strategy may touch while the agent runs.
pub struct AgentContext<'a> {
    pub task: &'a Task,
    pub workspace: &'a Path,
    pub logger: &'a mut TaskLogger,
    pub manager: &'a EnvironmentManager,
    /// The task's environment; `None` for local tasks.
    pub environment: Option<&'a Environment>,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Name prefix for the containers this strategy provisions.
    fn container_prefix(&self) -> &'static str;

    /// Image to provision for `task`, or `None` to run without a container.
    async fn environment_image(
        &self,
        task: &Task,
        manager: &EnvironmentManager,
    ) -> Result<Option<String>, ProvisionError>;

    /// Mounts added next to the workspace.
    fn extra_mounts(&self, log_root: &Path) -> Result<Vec<Mount>, ProvisionError>;

    async fn run_agent(&self, ctx: AgentContext<'_>) -> Result<SessionOutcome, AgentSessionError>;
}

/// Agent on the host, validation in the environment.
pub struct HostDriven {
    driver: SessionDriver,
}

impl HostDriven {
    pub fn new(driver: SessionDriver) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl ExecutionStrategy for HostDriven {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HostDriven
    }

    fn container_prefix(&self) -> &'static str {
        NAME_PREFIX
    }

    async fn environment_image(
        &self,
        task: &Task,
        _manager: &EnvironmentManager,
    ) -> Result<Option<String>, ProvisionError> {
        if task.is_local() {
            Ok(None)
        } else {
            Ok(Some(task.base_image.clone()))
        }
    }

    fn extra_mounts(&self, _log_root: &Path) -> Result<Vec<Mount>, ProvisionError> {
        Ok(Vec::new())
    }

    async fn run_agent(&self, ctx: AgentContext<'_>) -> Result<SessionOutcome, AgentSessionError> {
        self.driver.run(ctx.task, ctx.workspace, ctx.logger).await
    }
}

/// Agent and harness both inside a derived image.
pub struct InEnvironment {
    api_key: String,
    max_turns: u32,
    model: Option<String>,
    force_rebuild: bool,
    harness_binary: Option<PathBuf>,
}

impl InEnvironment {
    pub fn new(api_key: impl Into<String>, max_turns: u32) -> Self {
        Self {
            api_key: api_key.into(),
            max_turns,
            model: None,
            force_rebuild: false,
            harness_binary: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Binary copied into the derived image. Defaults to the running executable.
    pub fn with_harness_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.harness_binary = Some(path.into());
        self
    }

    /// Shell command that runs the session subcommand inside the container.
    pub fn session_command(&self, instance_id: &str) -> String {
        let task_file = format!("{LOG_MOUNT}/{instance_id}/{TASK_COPY_FILE}");
        let mut command = format!(
            "setupbench session --task-file {} --log-root {} --workspace {} --max-turns {}",
            shell_quote(&task_file),
            LOG_MOUNT,
            WORKSPACE_MOUNT,
            self.max_turns
        );
        if let Some(model) = &self.model {
            command.push_str(&format!(" --model {}", shell_quote(model)));
        }
        command
    }
}

#[async_trait]
impl ExecutionStrategy for InEnvironment {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InEnvironment
    }

    fn container_prefix(&self) -> &'static str {
        AGENT_NAME_PREFIX
    }

    async fn environment_image(
        &self,
        task: &Task,
        manager: &EnvironmentManager,
    ) -> Result<Option<String>, ProvisionError> {
        if task.is_local() {
            return Err(ProvisionError::UnsupportedImage {
                strategy: self.kind().to_string(),
                instance_id: task.instance_id.clone(),
            });
        }

        let binary = match &self.harness_binary {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };
        let tag = build_derived_image(
            manager.runtime().as_ref(),
            &task.base_image,
            &binary,
            self.force_rebuild,
        )
        .await?;
        Ok(Some(tag))
    }

    fn extra_mounts(&self, log_root: &Path) -> Result<Vec<Mount>, ProvisionError> {
        let host = fs::canonicalize(log_root)?;
        Ok(vec![Mount::new(host, LOG_MOUNT)])
    }

    async fn run_agent(&self, ctx: AgentContext<'_>) -> Result<SessionOutcome, AgentSessionError> {
        let env = ctx.environment.ok_or_else(|| {
            AgentSessionError::InEnvironment("no environment was provisioned".to_string())
        })?;

        let dir = ctx.logger.log_paths().dir().to_path_buf();
        fs::write(dir.join(TASK_COPY_FILE), serde_json::to_string_pretty(ctx.task)?)?;
        let report = dir.join(SESSION_REPORT_FILE);
        match fs::remove_file(&report) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        ctx.logger.record_message(
            &format!("Running agent inside environment {}", env.name()),
            LogLevel::Info,
        )?;

        let command = self.session_command(&ctx.task.instance_id);
        let env_vars = vec![format!("{API_KEY_ENV}={}", self.api_key)];
        let output = ctx
            .manager
            .exec(env, &command, Some(WORKSPACE_MOUNT), &env_vars)
            .await?;

        let content = match fs::read_to_string(&report) {
            Ok(content) => content,
            Err(_) => {
                return Err(AgentSessionError::InEnvironment(format!(
                    "session exited with code {} without a report: {}",
                    output.exit_code,
                    truncate(&output.combined(), 500)
                )))
            }
        };
        let outcome: SessionOutcome = serde_json::from_str(&content)?;
        ctx.logger.adopt_stats(outcome.stats);

        match outcome.error {
            Some(error) => Err(AgentSessionError::InEnvironment(error)),
            None => Ok(outcome),
        }
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
