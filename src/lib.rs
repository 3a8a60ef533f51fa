//! setupbench: evaluation harness for environment-setup agents.
//!
//! Each benchmark task runs an agent against a disposable container, records
//! every tool call and message, then re-checks the result in a fresh shell
//! so only durable setup counts.

// Core modules
pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod recorder;
pub mod task;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use error::{
    AgentSessionError, ConfigError, ContainerError, HarnessError, ProvisionError, RecorderError,
    TaskError, ValidationError,
};
pub use orchestrator::{RunSummary, TaskResult, TaskRunner, TaskStatus};
pub use task::{Task, TaskType};
