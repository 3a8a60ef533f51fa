//! CLI command definitions for setupbench.
//!
//! `run` executes one task or a dataset directory and writes per-task
//! results plus a summary; `sweep` and `build-image` manage the container
//! side. `session` is the entry point used inside derived images.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::agent::{ClaudeCliRuntime, SessionDriver, DEFAULT_MAX_TURNS};
use crate::agent::runtime::DEFAULT_AGENT_PROGRAM;
use crate::config::{HarnessConfig, API_KEY_ENV};
use crate::execution::{DockerClient, EnvironmentManager};
use crate::orchestrator::{
    run_session, ExecutionStrategy, HostDriven, InEnvironment, StrategyKind, TaskRunner,
};

/// Environment-setup agent benchmark harness.
#[derive(Parser)]
#[command(name = "setupbench")]
#[command(about = "Run environment-setup agents in disposable containers and validate in a fresh shell")]
#[command(version)]
#[command(
    long_about = "setupbench runs an agent on environment-setup tasks (install packages, configure services, resolve dependencies) inside disposable containers, then re-checks the result in a fresh shell.\n\nExample usage:\n  setupbench run --dataset ./tasks --limit 5 --output ./setupbench-results"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a single task file or every task in a dataset directory.
    Run(RunArgs),

    /// Remove leftover harness containers.
    Sweep,

    /// Build (or reuse) the derived agent image for a base image.
    BuildImage(BuildImageArgs),

    /// Run one agent session and write its report (used inside containers).
    #[command(hide = true)]
    Session(SessionArgs),
}

/// Arguments for `setupbench run`.
///
/// Options left unset keep the value from `--config` or the defaults.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Single task JSON file.
    #[arg(long, conflicts_with = "dataset", required_unless_present = "dataset")]
    pub task: Option<PathBuf>,

    /// Directory of task JSON files.
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Only run the first N tasks of the dataset.
    #[arg(long, requires = "dataset")]
    pub limit: Option<usize>,

    /// Output directory for results, logs and workspaces.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Agent phase timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Validation command timeout in seconds.
    #[arg(long)]
    pub validation_timeout: Option<u64>,

    /// Where the agent runs relative to the task environment.
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Fixture search root (repeatable, tried in order).
    #[arg(long = "fixtures-root")]
    pub fixtures_roots: Vec<PathBuf>,

    /// Turn budget for the agent session.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Model passed to the agent runtime.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Seconds to pause between dataset tasks.
    #[arg(long)]
    pub pause_secs: Option<u64>,

    /// Agent CLI executable.
    #[arg(long)]
    pub agent_program: Option<String>,

    /// Rebuild derived images even when cached.
    #[arg(long)]
    pub force_rebuild: bool,

    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Credential for the agent runtime.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

impl RunArgs {
    /// Layers these flags over the config file (or defaults).
    pub fn harness_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_yaml_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(output) = &self.output {
            config = config.with_output_dir(output);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(secs);
        }
        if let Some(secs) = self.validation_timeout {
            config = config.with_validation_timeout(secs);
        }
        if let Some(strategy) = self.strategy {
            config = config.with_strategy(strategy);
        }
        if !self.fixtures_roots.is_empty() {
            config = config.with_fixture_roots(self.fixtures_roots.clone());
        }
        if let Some(max_turns) = self.max_turns {
            config = config.with_max_turns(max_turns);
        }
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(secs) = self.pause_secs {
            config = config.with_pause_secs(secs);
        }
        if let Some(program) = &self.agent_program {
            config = config.with_agent_program(program);
        }
        if self.force_rebuild {
            config = config.with_force_rebuild(true);
        }
        if let Some(key) = &self.api_key {
            config = config.with_api_key(key);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `setupbench build-image`.
#[derive(Parser, Debug)]
pub struct BuildImageArgs {
    /// Base image the derived image starts from.
    #[arg(long)]
    pub base_image: String,

    /// Rebuild even when the image exists.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the hidden `setupbench session`.
#[derive(Parser, Debug)]
pub struct SessionArgs {
    #[arg(long)]
    pub task_file: PathBuf,

    #[arg(long)]
    pub log_root: PathBuf,

    #[arg(long)]
    pub workspace: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, default_value = DEFAULT_AGENT_PROGRAM)]
    pub agent_program: String,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Sweep => sweep_command().await,
        Commands::BuildImage(args) => build_image_command(args).await,
        Commands::Session(args) => session_command(args).await,
    }
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.harness_config()?;
    let api_key = config.require_api_key()?.to_string();

    let docker = connect_docker().await?;
    let strategy = build_strategy(&config, &api_key);

    info!(
        output = %config.output_dir.display(),
        strategy = %config.strategy,
        timeout_secs = config.agent_timeout_secs,
        "Starting setupbench run"
    );

    let runner = TaskRunner::new(config, Arc::new(docker), strategy);
    match (&args.task, &args.dataset) {
        (Some(task), _) => {
            runner.run_single(task).await?;
        }
        (None, Some(dataset)) => {
            runner.run_dataset(dataset, args.limit).await?;
        }
        (None, None) => anyhow::bail!("Either --task or --dataset is required"),
    }
    Ok(())
}

fn build_strategy(config: &HarnessConfig, api_key: &str) -> Box<dyn ExecutionStrategy> {
    match config.strategy {
        StrategyKind::HostDriven => {
            let runtime = ClaudeCliRuntime::new().with_program(&config.agent_program);
            let driver = SessionDriver::new(Arc::new(runtime))
                .with_max_turns(config.max_turns)
                .with_model(config.model.clone())
                .with_env(API_KEY_ENV, api_key);
            Box::new(HostDriven::new(driver))
        }
        StrategyKind::InEnvironment => Box::new(
            InEnvironment::new(api_key, config.max_turns)
                .with_model(config.model.clone())
                .with_force_rebuild(config.force_rebuild),
        ),
    }
}

/// Connects to the local Docker daemon and checks that it answers.
async fn connect_docker() -> anyhow::Result<DockerClient> {
    let docker = DockerClient::new().context("Failed to connect to the container runtime")?;
    docker
        .ping()
        .await
        .context("Container runtime is not responding")?;
    Ok(docker)
}

async fn sweep_command() -> anyhow::Result<()> {
    let docker = connect_docker().await?;
    let manager = EnvironmentManager::new(Arc::new(docker));
    let removed = manager.sweep().await?;
    println!("Removed {removed} leftover containers");
    Ok(())
}

async fn build_image_command(args: BuildImageArgs) -> anyhow::Result<()> {
    let docker = connect_docker().await?;
    let manager = EnvironmentManager::new(Arc::new(docker));
    let tag = manager.build_derived_image(&args.base_image, args.force).await?;
    println!("{tag}");
    Ok(())
}

async fn session_command(args: SessionArgs) -> anyhow::Result<()> {
    let mut config = HarnessConfig::default();
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key);
    }
    let api_key = config.require_api_key()?;

    let runtime = ClaudeCliRuntime::new().with_program(&args.agent_program);
    let driver = SessionDriver::new(Arc::new(runtime))
        .with_max_turns(args.max_turns)
        .with_model(args.model.clone())
        .with_env(API_KEY_ENV, api_key);

    let (outcome, report) =
        run_session(&args.task_file, &args.log_root, &args.workspace, &driver).await?;
    info!(
        report = %report.display(),
        tokens = outcome.total_tokens,
        failed = outcome.error.is_some(),
        "Session finished"
    );
    Ok(())
}
