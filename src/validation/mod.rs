//! Fresh-shell validation.
//!
//! After the agent finishes, the task's success command runs in a context
//! that shares none of the agent's shell state: a new host `bash -c` process
//! for local tasks, a new exec in the still-running container otherwise.
//! Only durable changes (files, installed packages, running services)
//! survive into that shell.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::ValidationError;
use crate::execution::{Environment, EnvironmentManager, ExecOutput, WORKSPACE_MOUNT};
use crate::task::{Task, TaskType};
use crate::utils::truncate;

/// Marker the success command prints when setup worked.
pub const SUCCESS_MARKER: &str = "Setup successful";

/// Default wall-clock budget for the success command.
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 120;

/// Characters of validation output kept in result records.
pub const RESULT_OUTPUT_LIMIT: usize = 1000;

/// Characters of validation output written to `agent.log`.
pub const LOG_OUTPUT_LIMIT: usize = 500;

/// Decides pass/fail from the success command's outcome.
///
/// Dependency resolution tasks pass on exit code 0; every other task type
/// passes when the combined output contains [`SUCCESS_MARKER`].
pub fn classify(task_type: &TaskType, exit_code: i64, combined_output: &str) -> bool {
    match task_type {
        TaskType::DependencyResolution => exit_code == 0,
        _ => combined_output.contains(SUCCESS_MARKER),
    }
}

/// Where the fresh shell is started.
pub enum ValidationContext<'a> {
    /// New `bash -c` process on the host, in the task workspace.
    HostShell { workdir: PathBuf },
    /// New exec inside the task's running container.
    Container {
        manager: &'a EnvironmentManager,
        env: &'a Environment,
    },
}

impl ValidationContext<'_> {
    fn describe(&self) -> String {
        match self {
            ValidationContext::HostShell { workdir } => format!("host shell in {}", workdir.display()),
            ValidationContext::Container { env, .. } => format!("container {}", env.name()),
        }
    }
}

/// Verdict of one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub success: bool,
    /// Exit code, if the command ran to completion.
    pub exit_code: Option<i64>,
    /// Full `stdout + stderr`, or the timeout/error text.
    pub output: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ValidationOutcome {
    fn failure(output: String, timed_out: bool, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: None,
            output,
            timed_out,
            duration,
        }
    }

    /// Output as stored in the result record.
    pub fn record_output(&self) -> String {
        truncate(&self.output, RESULT_OUTPUT_LIMIT).to_string()
    }

    /// Output excerpt for `agent.log`.
    pub fn log_excerpt(&self) -> &str {
        truncate(&self.output, LOG_OUTPUT_LIMIT)
    }
}

/// Runs success commands under a fixed time budget.
#[derive(Debug, Clone)]
pub struct ValidationRunner {
    timeout: Duration,
}

impl ValidationRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `task.success_command` in `context` and classifies the result.
    ///
    /// Never fails: timeouts and invocation errors become a FAIL verdict
    /// with the reason as output.
    pub async fn run(&self, task: &Task, context: ValidationContext<'_>) -> ValidationOutcome {
        let start = Instant::now();
        info!(
            instance_id = %task.instance_id,
            context = %context.describe(),
            "Running validation command in fresh shell"
        );

        let result =
            tokio::time::timeout(self.timeout, execute(&task.success_command, &context)).await;
        let duration = start.elapsed();

        match result {
            Ok(Ok(out)) => {
                let combined = out.combined();
                let success = classify(&task.task_type, out.exit_code, &combined);
                info!(
                    instance_id = %task.instance_id,
                    exit_code = out.exit_code,
                    success,
                    "Validation finished"
                );
                ValidationOutcome {
                    success,
                    exit_code: Some(out.exit_code),
                    output: combined,
                    timed_out: false,
                    duration,
                }
            }
            Ok(Err(e)) => {
                warn!(instance_id = %task.instance_id, error = %e, "Validation invocation failed");
                ValidationOutcome::failure(format!("Validation error: {e}"), false, duration)
            }
            Err(_) => {
                warn!(instance_id = %task.instance_id, "Validation command timed out");
                ValidationOutcome::failure(
                    format!(
                        "Validation command timed out after {}s",
                        self.timeout.as_secs()
                    ),
                    true,
                    duration,
                )
            }
        }
    }
}

impl Default for ValidationRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_VALIDATION_TIMEOUT_SECS))
    }
}

async fn execute(
    command: &str,
    context: &ValidationContext<'_>,
) -> Result<ExecOutput, ValidationError> {
    match context {
        ValidationContext::HostShell { workdir } => {
            let output = Command::new("bash")
                .arg("-c")
                .arg(command)
                .current_dir(workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ValidationError::Spawn(e.to_string()))?;

            Ok(ExecOutput {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
        ValidationContext::Container { manager, env } => Ok(manager
            .exec(env, command, Some(WORKSPACE_MOUNT), &[])
            .await?),
    }
}
