//! Error types for setupbench operations.
//!
//! Defines error types for each subsystem of the harness:
//! - Task file loading and discovery
//! - Per-task log recording
//! - Container runtime calls and environment provisioning
//! - Agent session driving
//! - Validation command invocation
//! - Configuration and credentials
//!
//! Per-task failures are converted into result records by the orchestrator;
//! only [`ConfigError`] is allowed to abort a whole run.

use thiserror::Error;

/// Errors that can occur while loading task files.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Failed to read task file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse task file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid task '{instance_id}': {reason}")]
    Invalid { instance_id: String, reason: String },

    #[error("Dataset directory '{0}' does not exist")]
    DatasetNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while recording logs for a task instance.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Log write failed for '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Post-tool entry for '{correlation_id}' has no matching pre-tool entry")]
    UnmatchedPost { correlation_id: String },

    #[error("Pre-tool entry for '{correlation_id}' is already open")]
    DuplicatePre { correlation_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by a container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container runtime not available: {0}")]
    Unavailable(String),

    #[error("Image '{0}' not found")]
    ImageNotFound(String),

    #[error("Container '{0}' not found")]
    NotFound(String),

    #[error("Container API call failed: {0}")]
    Api(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while provisioning an execution environment.
///
/// Provisioning failures are fatal for the task and are not retried.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Image '{image}' could not be resolved: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("Failed to build image '{tag}': {reason}")]
    ImageBuild { tag: String, reason: String },

    #[error("Failed to start environment '{name}': {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Strategy '{strategy}' cannot run local task '{instance_id}'")]
    UnsupportedImage {
        strategy: String,
        instance_id: String,
    },

    #[error("Container runtime error: {0}")]
    Runtime(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while driving an agent session.
///
/// Any of these aborts the session; the task is recorded as crashed.
#[derive(Debug, Error)]
pub enum AgentSessionError {
    #[error("Failed to render system prompt: {0}")]
    Prompt(#[from] tera::Error),

    #[error("Failed to launch agent runtime '{program}': {reason}")]
    Launch { program: String, reason: String },

    #[error("Agent stream failed: {0}")]
    Stream(String),

    #[error("Agent runtime exited with code {code}: {stderr}")]
    RuntimeExited { code: i32, stderr: String },

    #[error("In-environment session failed: {0}")]
    InEnvironment(String),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while invoking a validation command.
///
/// The validation runner never propagates these; they become a FAIL verdict
/// with the error text embedded in the output.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Failed to spawn validation shell: {0}")]
    Spawn(String),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors. These abort the process before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing credential: {0} environment variable not set")]
    MissingCredential(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Umbrella error for a single task run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Provision error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Agent crashed: {0}")]
    Agent(#[from] AgentSessionError),

    #[error("Agent timed out after {seconds}s")]
    AgentTimeout { seconds: u64 },

    #[error("Invalid task state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
