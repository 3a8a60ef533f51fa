//! Benchmark task records.
//!
//! A task is loaded once from a JSON file and never mutated:
//!
//! ```json
//! {
//!   "instance_id": "db-001",
//!   "task_type": "database_setup",
//!   "base_image": "ubuntu:22.04",
//!   "problem_statement": "Install PostgreSQL and ...",
//!   "success_command": "bash /testbed/check.sh"
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Base image value meaning "run on the host, no container".
pub const LOCAL_IMAGE: &str = "local";

/// Category of a setup task.
///
/// The set is open: unknown categories are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    DatabaseSetup,
    DependencyResolution,
    BackgroundService,
    RepoSetup,
    Other(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::DatabaseSetup => "database_setup",
            TaskType::DependencyResolution => "dependency_resolution",
            TaskType::BackgroundService => "background_service",
            TaskType::RepoSetup => "repo_setup",
            TaskType::Other(s) => s,
        }
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "database_setup" => TaskType::DatabaseSetup,
            "dependency_resolution" => TaskType::DependencyResolution,
            "background_service" => TaskType::BackgroundService,
            "repo_setup" => TaskType::RepoSetup,
            _ => TaskType::Other(s),
        }
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        TaskType::from(s.to_string())
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One benchmark unit: a setup goal, its base environment and its check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique instance identifier (also used for naming logs and containers).
    pub instance_id: String,
    /// Task category; decides how validation output is classified.
    pub task_type: TaskType,
    /// Container image the task starts from, or `local`.
    pub base_image: String,
    /// Natural-language instructions given to the agent.
    pub problem_statement: String,
    /// Shell command whose output or exit code decides pass/fail.
    pub success_command: String,
}

impl Task {
    /// Parses a task from a JSON string and checks required fields.
    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_str(json).map_err(|source| TaskError::Parse {
            path: origin.to_string(),
            source,
        })?;
        task.validate()?;
        Ok(task)
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.instance_id.trim().is_empty() {
            return Err(TaskError::Invalid {
                instance_id: self.instance_id.clone(),
                reason: "instance_id is empty".to_string(),
            });
        }
        if !is_safe_instance_id(&self.instance_id) {
            return Err(TaskError::Invalid {
                instance_id: self.instance_id.clone(),
                reason: "instance_id may only contain [A-Za-z0-9._-] and must not be '.' or '..'"
                    .to_string(),
            });
        }
        if self.success_command.trim().is_empty() {
            return Err(TaskError::Invalid {
                instance_id: self.instance_id.clone(),
                reason: "success_command is empty".to_string(),
            });
        }
        if self.base_image.trim().is_empty() {
            return Err(TaskError::Invalid {
                instance_id: self.instance_id.clone(),
                reason: "base_image is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns true if the task runs on the host instead of a container.
    pub fn is_local(&self) -> bool {
        self.base_image == LOCAL_IMAGE
    }
}

/// True if `id` can be used as a single path component for logs, results
/// and workspaces.
pub fn is_safe_instance_id(id: &str) -> bool {
    if id == "." || id == ".." {
        return false;
    }
    match Regex::new(r"^[A-Za-z0-9._-]+$") {
        Ok(re) => re.is_match(id),
        Err(_) => false,
    }
}

/// Loads a task from a JSON file.
pub fn load_task(path: &Path) -> Result<Task, TaskError> {
    let content = fs::read_to_string(path).map_err(|source| TaskError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Task::from_json_str(&content, &path.display().to_string())
}

/// Lists `*.json` task files in a dataset directory, sorted by name.
///
/// When `limit` is set only the first `limit` files are returned.
pub fn discover_tasks(dataset_dir: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>, TaskError> {
    if !dataset_dir.is_dir() {
        return Err(TaskError::DatasetNotFound(
            dataset_dir.display().to_string(),
        ));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dataset_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    if let Some(limit) = limit {
        paths.truncate(limit);
    }

    Ok(paths)
}

/// Best-effort instance id for a task file that could not be parsed.
///
/// Falls back to `unknown` when the file stem is not a safe id.
pub fn fallback_instance_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|stem| is_safe_instance_id(stem))
        .unwrap_or_else(|| "unknown".to_string())
}
