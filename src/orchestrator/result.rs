//! Per-task result records and the batch summary.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recorder::{LogPaths, Stats};
use crate::task::Task;
use crate::validation::{ValidationOutcome, RESULT_OUTPUT_LIMIT};
use crate::utils::truncate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Passed,
    Failed,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one task, written once to `results/<instance_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub instance_id: String,
    pub task_type: String,
    pub base_image: String,
    pub success: bool,
    pub status: TaskStatus,
    pub validation_output: String,
    pub wall_time_seconds: f64,
    pub total_steps: u64,
    pub bash_calls: u64,
    pub read_calls: u64,
    pub write_calls: u64,
    pub edit_calls: u64,
    pub total_tokens: u64,
    pub errors: u64,
    pub messages: u64,
    /// Set when the environment could not be torn down.
    pub environment_leaked: bool,
    pub logs: LogPaths,
}

impl TaskResult {
    /// Result of a task that reached validation.
    pub fn completed(
        task: &Task,
        validation: &ValidationOutcome,
        stats: Stats,
        total_tokens: u64,
        wall_time_seconds: f64,
        logs: LogPaths,
    ) -> Self {
        let status = if validation.success {
            TaskStatus::Passed
        } else {
            TaskStatus::Failed
        };
        Self {
            instance_id: task.instance_id.clone(),
            task_type: task.task_type.to_string(),
            base_image: task.base_image.clone(),
            success: validation.success,
            status,
            validation_output: validation.record_output(),
            wall_time_seconds,
            total_steps: stats.total_tool_calls,
            bash_calls: stats.bash_calls,
            read_calls: stats.read_calls,
            write_calls: stats.write_calls,
            edit_calls: stats.edit_calls,
            total_tokens,
            errors: stats.errors,
            messages: stats.messages,
            environment_leaked: false,
            logs,
        }
    }

    /// Result of a task that failed before producing a verdict.
    ///
    /// Token usage is not trusted after a failure and is reported as zero.
    pub fn errored(
        instance_id: impl Into<String>,
        task_type: impl Into<String>,
        base_image: impl Into<String>,
        message: &str,
        stats: Stats,
        wall_time_seconds: f64,
        logs: LogPaths,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            task_type: task_type.into(),
            base_image: base_image.into(),
            success: false,
            status: TaskStatus::Error,
            validation_output: truncate(message, RESULT_OUTPUT_LIMIT).to_string(),
            wall_time_seconds,
            total_steps: stats.total_tool_calls,
            bash_calls: stats.bash_calls,
            read_calls: stats.read_calls,
            write_calls: stats.write_calls,
            edit_calls: stats.edit_calls,
            total_tokens: 0,
            errors: stats.errors + 1,
            messages: stats.messages,
            environment_leaked: false,
            logs,
        }
    }

    pub fn with_environment_leaked(mut self, leaked: bool) -> Self {
        self.environment_leaked = leaked;
        self
    }

    /// Console line printed after each task.
    pub fn console_lines(&self) -> String {
        let verdict = if self.success { "PASS" } else { "FAIL" };
        format!(
            "{} - {}\nTime: {:.1}s | Steps: {} | Bash: {} | Errors: {}",
            verdict,
            self.instance_id,
            self.wall_time_seconds,
            self.total_steps,
            self.bash_calls,
            self.errors
        )
    }
}

/// Aggregate metrics over a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    /// Everything that did not pass, errored tasks included.
    pub failed_tasks: usize,
    pub errored_tasks: usize,
    /// Percentage in `[0, 100]`.
    pub success_rate: f64,
    pub avg_tokens: f64,
    pub avg_steps: f64,
    pub avg_time_seconds: f64,
    pub leaked_environments: usize,
    pub results: Vec<TaskResult>,
}

impl RunSummary {
    pub fn from_results(results: Vec<TaskResult>) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let errored = results
            .iter()
            .filter(|r| r.status == TaskStatus::Error)
            .count();
        let leaked = results.iter().filter(|r| r.environment_leaked).count();

        let average = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };
        let success_rate = average(successful as f64 * 100.0);
        let avg_tokens = average(results.iter().map(|r| r.total_tokens as f64).sum());
        let avg_steps = average(results.iter().map(|r| r.total_steps as f64).sum());
        let avg_time = average(results.iter().map(|r| r.wall_time_seconds).sum());

        Self {
            timestamp: Utc::now(),
            total_tasks: total,
            successful_tasks: successful,
            failed_tasks: total - successful,
            errored_tasks: errored,
            success_rate,
            avg_tokens,
            avg_steps,
            avg_time_seconds: avg_time,
            leaked_environments: leaked,
            results,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        writeln!(f, "{rule}")?;
        writeln!(f, "SETUPBENCH RESULTS")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total tasks: {}", self.total_tasks)?;
        writeln!(
            f,
            "Success rate: {}/{} ({:.1}%)",
            self.successful_tasks, self.total_tasks, self.success_rate
        )?;
        if self.errored_tasks > 0 {
            writeln!(f, "Errored: {}", self.errored_tasks)?;
        }
        writeln!(f, "Avg tokens: {:.1}K", self.avg_tokens / 1000.0)?;
        writeln!(f, "Avg steps: {:.1}", self.avg_steps)?;
        writeln!(f, "Avg time: {:.1}s", self.avg_time_seconds)?;
        if self.leaked_environments > 0 {
            writeln!(f, "Leaked environments: {}", self.leaked_environments)?;
        }
        write!(f, "{rule}")
    }
}

/// Writes `<output_dir>/results/<instance_id>.json`.
pub fn save_result(output_dir: &Path, result: &TaskResult) -> io::Result<PathBuf> {
    let dir = output_dir.join("results");
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", result.instance_id));
    let json = serde_json::to_string_pretty(result)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Writes `<output_dir>/summary.json`.
pub fn save_summary(output_dir: &Path, summary: &RunSummary) -> io::Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let path = output_dir.join("summary.json");
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&path, json)?;
    Ok(path)
}
