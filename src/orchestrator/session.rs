//! Entry point for sessions that run inside the task environment.
//!
//! The host writes `task.json` into the instance log directory, execs the
//! hidden `session` subcommand in the container, and reads `session.json`
//! back once the exec returns.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{SessionDriver, SessionOutcome};
use crate::error::HarnessError;
use crate::recorder::{LogLevel, TaskLogger};
use crate::task::load_task;

/// Copy of the task placed next to the logs for the in-container session.
pub const TASK_COPY_FILE: &str = "task.json";

/// Outcome written by the in-container session.
pub const SESSION_REPORT_FILE: &str = "session.json";

/// Runs one session and writes its report.
///
/// A failed session still produces a report carrying the error and the
/// counters recorded so far; only failures to load the task or open the
/// logs are returned as errors.
pub async fn run_session(
    task_file: &Path,
    log_root: &Path,
    workspace: &Path,
    driver: &SessionDriver,
) -> Result<(SessionOutcome, PathBuf), HarnessError> {
    let task = load_task(task_file)?;
    let mut logger = TaskLogger::open(log_root, &task.instance_id)?;
    let session_id = Uuid::new_v4();
    info!(instance_id = %task.instance_id, session_id = %session_id, "Starting in-environment session");

    let outcome = match driver.run(&task, workspace, &mut logger).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Err(log_err) =
                logger.record_message(&format!("Agent error: {e}"), LogLevel::Error)
            {
                warn!(error = %log_err, "Failed to record session error");
            }
            SessionOutcome {
                stats: logger.snapshot_stats(),
                error: Some(e.to_string()),
                ..SessionOutcome::default()
            }
        }
    };

    let report = logger.log_paths().dir().join(SESSION_REPORT_FILE);
    fs::write(&report, serde_json::to_string_pretty(&outcome).map_err(std::io::Error::from)?)?;
    info!(
        instance_id = %task.instance_id,
        session_id = %session_id,
        tokens = outcome.total_tokens,
        "Session report written"
    );
    Ok((outcome, report))
}
