//! Task orchestration.
//!
//! Each task moves through
//!
//! ```text
//! Loading → WorkspaceReady → AgentRunning → Validating → Done
//! ```
//!
//! with `Error` reachable from any non-terminal state. Whatever happens, a
//! result record is written and the task's environment is released.

pub mod fixtures;
pub mod result;
pub mod runner;
pub mod session;
pub mod state;
pub mod strategy;

pub use fixtures::{copy_fixtures, find_fixture_dir, prepare_workspace};
pub use result::{save_result, save_summary, RunSummary, TaskResult, TaskStatus};
pub use runner::TaskRunner;
pub use session::{run_session, SESSION_REPORT_FILE, TASK_COPY_FILE};
pub use state::{TaskState, TaskStateMachine};
pub use strategy::{AgentContext, ExecutionStrategy, HostDriven, InEnvironment, StrategyKind};
