//! Per-task sequencing and batch execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::agent::{close_open_calls, SessionOutcome};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::execution::{ContainerRuntime, Environment, EnvironmentManager, ReleaseOutcome};
use crate::recorder::{LogLevel, LogPaths, Stats, TaskLogger};
use crate::task::{discover_tasks, fallback_instance_id, load_task, Task};
use crate::validation::{ValidationContext, ValidationOutcome, ValidationRunner};

use super::fixtures::{copy_fixtures, find_fixture_dir, prepare_workspace};
use super::result::{save_result, save_summary, RunSummary, TaskResult};
use super::state::{TaskState, TaskStateMachine};
use super::strategy::{AgentContext, ExecutionStrategy};

/// What the environment-bound phases produced.
struct PhaseReport {
    outcome: Result<(SessionOutcome, ValidationOutcome), HarnessError>,
    leaked: bool,
}

/// Runs tasks one at a time under a fixed configuration.
pub struct TaskRunner {
    config: HarnessConfig,
    manager: EnvironmentManager,
    strategy: Box<dyn ExecutionStrategy>,
    validator: ValidationRunner,
}

impl TaskRunner {
    pub fn new(
        config: HarnessConfig,
        runtime: Arc<dyn ContainerRuntime>,
        strategy: Box<dyn ExecutionStrategy>,
    ) -> Self {
        let manager = EnvironmentManager::new(runtime).with_name_prefix(strategy.container_prefix());
        let validator = ValidationRunner::new(config.validation_timeout());
        Self {
            config,
            manager,
            strategy,
            validator,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn manager(&self) -> &EnvironmentManager {
        &self.manager
    }

    /// Runs one task file to a persisted result. Never fails: every error
    /// becomes a result with `status = error`.
    pub async fn run_task(&self, task_file: &Path) -> TaskResult {
        let start = Instant::now();
        let log_root = self.config.log_root();
        let mut sm = TaskStateMachine::new(fallback_instance_id(task_file));

        let task = match load_task(task_file) {
            Ok(task) => task,
            Err(e) => {
                error!(path = %task_file.display(), error = %e, "Failed to load task");
                sm.fail();
                let instance_id = fallback_instance_id(task_file);
                let (stats, logs) = match TaskLogger::open(&log_root, &instance_id) {
                    Ok(mut logger) => {
                        note(&mut logger, &format!("Failed to load task: {e}"), LogLevel::Error);
                        (logger.snapshot_stats(), logger.log_paths())
                    }
                    Err(_) => (Stats::default(), LogPaths::for_instance(&log_root, &instance_id)),
                };
                let result = TaskResult::errored(
                    instance_id,
                    "unknown",
                    "unknown",
                    &HarnessError::from(e).to_string(),
                    stats,
                    start.elapsed().as_secs_f64(),
                    logs,
                );
                return self.finish(result);
            }
        };
        sm.rename(&task.instance_id);

        let mut logger = match TaskLogger::open(&log_root, &task.instance_id) {
            Ok(logger) => logger,
            Err(e) => {
                error!(instance_id = %task.instance_id, error = %e, "Failed to open task logs");
                sm.fail();
                let result = self.errored(
                    &task,
                    &HarnessError::from(e),
                    Stats::default(),
                    start,
                    LogPaths::for_instance(&log_root, &task.instance_id),
                );
                return self.finish(result);
            }
        };

        println!("\n{}", "=".repeat(70));
        println!("Task: {}", task.instance_id);
        println!("Type: {}", task.task_type);
        println!("Base Image: {}", task.base_image);
        println!("{}\n", "=".repeat(70));

        note(&mut logger, &format!("Starting task: {}", task.instance_id), LogLevel::Info);
        note(&mut logger, &format!("Task type: {}", task.task_type), LogLevel::Info);
        note(&mut logger, &format!("Base image: {}", task.base_image), LogLevel::Info);
        note(&mut logger, &format!("Strategy: {}", self.strategy.kind()), LogLevel::Info);

        let workspace = match self.stage_workspace(&task, &mut logger) {
            Ok(workspace) => workspace,
            Err(e) => {
                sm.fail();
                note(&mut logger, &e.to_string(), LogLevel::Error);
                let result = self.errored(&task, &e, logger.snapshot_stats(), start, logger.log_paths());
                return self.finish(result);
            }
        };

        let report = match sm.transition(TaskState::WorkspaceReady) {
            Ok(()) => self.run_phases(&task, &workspace, &mut logger, &mut sm).await,
            Err(e) => PhaseReport {
                outcome: Err(e),
                leaked: false,
            },
        };

        let result = match report.outcome {
            Ok((session, validation)) => {
                note(
                    &mut logger,
                    &format!("Validation output: {}", validation.log_excerpt()),
                    LogLevel::Info,
                );
                note(
                    &mut logger,
                    &format!("Result: {}", if validation.success { "PASS" } else { "FAIL" }),
                    LogLevel::Info,
                );
                if let Err(e) = sm.transition(TaskState::Done) {
                    warn!(instance_id = %task.instance_id, error = %e, "Unexpected state at completion");
                }
                TaskResult::completed(
                    &task,
                    &validation,
                    logger.snapshot_stats(),
                    session.total_tokens,
                    start.elapsed().as_secs_f64(),
                    logger.log_paths(),
                )
            }
            Err(e) => {
                sm.fail();
                note(&mut logger, &e.to_string(), LogLevel::Error);
                self.errored(&task, &e, logger.snapshot_stats(), start, logger.log_paths())
            }
        };

        self.finish(result.with_environment_leaked(report.leaked))
    }

    /// Runs task files strictly in order and writes `summary.json`.
    ///
    /// Leftover harness containers from earlier runs are removed first.
    pub async fn run_batch(&self, task_files: &[PathBuf]) -> Result<RunSummary, HarnessError> {
        match self.manager.sweep().await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Removed leftover environments"),
            Err(e) => warn!(error = %e, "Sweep failed, continuing"),
        }

        println!("Found {} tasks to run\n", task_files.len());

        let mut results = Vec::with_capacity(task_files.len());
        for (i, path) in task_files.iter().enumerate() {
            if i > 0 && !self.config.pause().is_zero() {
                tokio::time::sleep(self.config.pause()).await;
            }
            results.push(self.run_task(path).await);
        }

        self.summarize(results)
    }

    /// Runs a single task file and writes `summary.json` for it.
    ///
    /// Unlike a batch, no sweep happens first.
    pub async fn run_single(&self, task_file: &Path) -> Result<RunSummary, HarnessError> {
        let result = self.run_task(task_file).await;
        self.summarize(vec![result])
    }

    /// Discovers `*.json` tasks in `dataset_dir` and runs them as a batch.
    pub async fn run_dataset(
        &self,
        dataset_dir: &Path,
        limit: Option<usize>,
    ) -> Result<RunSummary, HarnessError> {
        let task_files = discover_tasks(dataset_dir, limit)?;
        info!(
            dataset = %dataset_dir.display(),
            tasks = task_files.len(),
            "Discovered tasks"
        );
        self.run_batch(&task_files).await
    }

    fn summarize(&self, results: Vec<TaskResult>) -> Result<RunSummary, HarnessError> {
        let summary = RunSummary::from_results(results);
        let path = save_summary(&self.config.output_dir, &summary)?;

        println!("\n{summary}\n");
        println!("Results saved to: {}", self.config.output_dir.display());
        println!("Summary: {}", path.display());

        Ok(summary)
    }

    fn stage_workspace(&self, task: &Task, logger: &mut TaskLogger) -> Result<PathBuf, HarnessError> {
        let workspace = prepare_workspace(&self.config.output_dir, &task.instance_id)
            .map_err(HarnessError::Workspace)?;
        note(logger, &format!("Workspace: {}", workspace.display()), LogLevel::Info);

        match find_fixture_dir(&self.config.fixture_roots, &task.instance_id) {
            Some(dir) => {
                let copied = copy_fixtures(&dir, &workspace).map_err(HarnessError::Workspace)?;
                note(
                    logger,
                    &format!("Copied {} fixture files from {}", copied, dir.display()),
                    LogLevel::Info,
                );
            }
            None => note(
                logger,
                "No fixtures found for this task, skipping fixture copy",
                LogLevel::Info,
            ),
        }
        Ok(workspace)
    }

    /// Provisions, runs the agent and validates; the environment is released
    /// on every path out of here.
    async fn run_phases(
        &self,
        task: &Task,
        workspace: &Path,
        logger: &mut TaskLogger,
        sm: &mut TaskStateMachine,
    ) -> PhaseReport {
        let env = match self.provision(task, workspace, logger).await {
            Ok(env) => env,
            Err(e) => {
                return PhaseReport {
                    outcome: Err(e),
                    leaked: false,
                }
            }
        };

        let outcome = self
            .agent_then_validate(task, workspace, logger, sm, env.as_ref())
            .await;

        let leaked = match env {
            Some(env) => {
                let release = self.manager.release(env).await;
                if let ReleaseOutcome::TeardownWarning(msg) = &release {
                    note(logger, &format!("Environment teardown failed: {msg}"), LogLevel::Warn);
                }
                release.is_leak()
            }
            None => false,
        };

        PhaseReport { outcome, leaked }
    }

    async fn provision(
        &self,
        task: &Task,
        workspace: &Path,
        logger: &mut TaskLogger,
    ) -> Result<Option<Environment>, HarnessError> {
        let image = match self.strategy.environment_image(task, &self.manager).await? {
            Some(image) => image,
            None => {
                note(logger, "Local task, running without a container", LogLevel::Info);
                return Ok(None);
            }
        };

        let mounts = self.strategy.extra_mounts(&self.config.log_root())?;
        let env = self
            .manager
            .provision(&image, workspace, &task.instance_id, &mounts)
            .await?;
        note(
            logger,
            &format!("Environment {} running from {}", env.name(), image),
            LogLevel::Info,
        );
        Ok(Some(env))
    }

    async fn agent_then_validate(
        &self,
        task: &Task,
        workspace: &Path,
        logger: &mut TaskLogger,
        sm: &mut TaskStateMachine,
        env: Option<&Environment>,
    ) -> Result<(SessionOutcome, ValidationOutcome), HarnessError> {
        sm.transition(TaskState::AgentRunning)?;

        let ctx = AgentContext {
            task,
            workspace,
            logger: &mut *logger,
            manager: &self.manager,
            environment: env,
        };
        let attempt =
            tokio::time::timeout(self.config.agent_timeout(), self.strategy.run_agent(ctx)).await;
        let session = match attempt {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                close_open_calls(logger);
                return Err(HarnessError::Agent(e));
            }
            Err(_) => {
                close_open_calls(logger);
                return Err(HarnessError::AgentTimeout {
                    seconds: self.config.agent_timeout_secs,
                });
            }
        };

        sm.transition(TaskState::Validating)?;
        note(
            logger,
            &format!("Running validation: {}", task.success_command),
            LogLevel::Info,
        );

        let context = match env {
            Some(env) => ValidationContext::Container {
                manager: &self.manager,
                env,
            },
            None => ValidationContext::HostShell {
                workdir: workspace.to_path_buf(),
            },
        };
        let validation = self.validator.run(task, context).await;
        Ok((session, validation))
    }

    fn errored(
        &self,
        task: &Task,
        err: &HarnessError,
        stats: Stats,
        start: Instant,
        logs: LogPaths,
    ) -> TaskResult {
        TaskResult::errored(
            task.instance_id.clone(),
            task.task_type.to_string(),
            task.base_image.clone(),
            &err.to_string(),
            stats,
            start.elapsed().as_secs_f64(),
            logs,
        )
    }

    /// Persists the result and prints its console lines.
    fn finish(&self, result: TaskResult) -> TaskResult {
        match save_result(&self.config.output_dir, &result) {
            Ok(path) => info!(instance_id = %result.instance_id, path = %path.display(), "Saved result"),
            Err(e) => error!(instance_id = %result.instance_id, error = %e, "Failed to save result"),
        }
        println!("\n{}", result.console_lines());
        result
    }
}

/// Records a line in `agent.log`; a write failure is logged and ignored.
fn note(logger: &mut TaskLogger, text: &str, level: LogLevel) {
    if let Err(e) = logger.record_message(text, level) {
        warn!(instance_id = %logger.instance_id(), error = %e, "Failed to write agent log");
    }
}
