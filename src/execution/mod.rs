//! Container execution layer.
//!
//! Provides the [`ContainerRuntime`] seam with its bollard implementation,
//! per-task environment lifecycle, and derived agent image builds.
//!
//! # Lifecycle
//!
//! ```text
//! PENDING → RUNNING → (exec)* → RELEASED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use setupbench::execution::{DockerClient, EnvironmentManager};
//!
//! let manager = EnvironmentManager::new(Arc::new(DockerClient::new()?));
//! let env = manager.provision("ubuntu:22.04", &workspace, "db-001", &[]).await?;
//! let out = manager.exec(&env, "echo hello", Some("/testbed"), &[]).await?;
//! manager.release(env).await;
//! ```

pub mod docker_client;
pub mod environment;
pub mod image;
pub mod runtime;

pub use docker_client::DockerClient;
pub use environment::{
    container_name, Environment, EnvironmentManager, EnvironmentStatus, Mount, ReleaseOutcome,
};
pub use image::{agent_image_tag, build_derived_image};
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ExecRequest};

/// Container path of the task workspace (also the working directory).
pub const WORKSPACE_MOUNT: &str = "/testbed";

/// Container path of the host log directory for in-environment sessions.
pub const LOG_MOUNT: &str = "/setupbench/logs";

/// Prefix shared by every container the harness creates.
pub const NAME_PREFIX: &str = "setupbench-";

/// Prefix for containers that run the agent inside the environment.
pub const AGENT_NAME_PREFIX: &str = "setupbench-agent-";

/// Seconds to wait for a graceful stop before killing.
pub const STOP_GRACE_SECS: i64 = 5;
