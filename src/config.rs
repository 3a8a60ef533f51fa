//! Harness configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional YAML file, and command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::runtime::DEFAULT_AGENT_PROGRAM;
use crate::agent::DEFAULT_MAX_TURNS;
use crate::error::ConfigError;
use crate::orchestrator::StrategyKind;
use crate::validation::DEFAULT_VALIDATION_TIMEOUT_SECS;

/// Environment variable holding the agent runtime credential.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./setupbench-results";

/// Default agent phase budget in seconds.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 7200;

/// Default pause between tasks in a batch.
pub const DEFAULT_PAUSE_SECS: u64 = 2;

/// Configuration for a harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root for `results/`, `logs/`, `workspaces/` and `summary.json`.
    pub output_dir: PathBuf,
    /// Budget for the agent phase.
    pub agent_timeout_secs: u64,
    /// Budget for the success command.
    pub validation_timeout_secs: u64,
    /// How the agent is run relative to the environment.
    pub strategy: StrategyKind,
    /// Candidate roots searched for task fixtures, in order.
    pub fixture_roots: Vec<PathBuf>,
    pub max_turns: u32,
    pub model: Option<String>,
    /// Pause between consecutive tasks of a batch.
    pub pause_secs: u64,
    /// Agent CLI executable.
    pub agent_program: String,
    /// Rebuild derived images even when cached.
    pub force_rebuild: bool,
    /// Credential for the agent runtime. Never read from or written to files.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            validation_timeout_secs: DEFAULT_VALIDATION_TIMEOUT_SECS,
            strategy: StrategyKind::default(),
            fixture_roots: default_fixture_roots(),
            max_turns: DEFAULT_MAX_TURNS,
            model: None,
            pause_secs: DEFAULT_PAUSE_SECS,
            agent_program: DEFAULT_AGENT_PROGRAM.to_string(),
            force_rebuild: false,
            api_key: None,
        }
    }

    /// Loads a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make every task fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.validation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "validation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_turns == 0 {
            return Err(ConfigError::Invalid(
                "max_turns must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.agent_timeout_secs = secs;
        self
    }

    pub fn with_validation_timeout(mut self, secs: u64) -> Self {
        self.validation_timeout_secs = secs;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the fixture search roots.
    pub fn with_fixture_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.fixture_roots = roots;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_pause_secs(mut self, secs: u64) -> Self {
        self.pause_secs = secs;
        self
    }

    pub fn with_agent_program(mut self, program: impl Into<String>) -> Self {
        self.agent_program = program.into();
        self
    }

    pub fn with_force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Returns the credential or a fatal configuration error.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredential(API_KEY_ENV.to_string())),
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }

    pub fn log_root(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.output_dir.join("workspaces")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("summary.json")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sibling, child, and parent-sibling `SetupBench` checkouts.
pub fn default_fixture_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("../SetupBench"), PathBuf::from("SetupBench")];
    if let Some(parent) = std::env::current_dir()
        .ok()
        .and_then(|cwd| cwd.parent().map(Path::to_path_buf))
    {
        roots.push(parent.join("SetupBench"));
    }
    roots
}
