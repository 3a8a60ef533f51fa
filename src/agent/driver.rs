//! Drives one agent session and records everything it does.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::events::{AgentEvent, ContentBlock};
use super::prompts::{render_system_prompt, ALLOWED_TOOLS, DEFAULT_MAX_TURNS};
use super::runtime::{AgentRuntime, SessionRequest};
use crate::error::{AgentSessionError, RecorderError};
use crate::recorder::{LogLevel, MessageBlock, Role, Stats, TaskLogger, ToolLogEntry};
use crate::task::Task;
use crate::utils::truncate;

/// Error recorded on tool invocations left open when a session ends early.
pub const SESSION_ABORTED: &str = "session aborted";

/// What a finished session produced.
///
/// Also the content of `session.json` when the session ran inside the
/// environment; `error` is only set there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub total_tokens: u64,
    pub num_turns: u32,
    pub stats: Stats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs sessions against an [`AgentRuntime`].
pub struct SessionDriver {
    runtime: Arc<dyn AgentRuntime>,
    max_turns: u32,
    model: Option<String>,
    env: Vec<(String, String)>,
}

impl SessionDriver {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            max_turns: DEFAULT_MAX_TURNS,
            model: None,
            env: Vec::new(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Environment variables passed to the runtime process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Runs the agent on `task` in `working_dir`, recording into `logger`.
    ///
    /// Stops after the first result event. A stream error aborts the
    /// session and is returned; there is no retry.
    pub async fn run(
        &self,
        task: &Task,
        working_dir: &Path,
        logger: &mut TaskLogger,
    ) -> Result<SessionOutcome, AgentSessionError> {
        let request = SessionRequest {
            system_prompt: render_system_prompt(task)?,
            user_prompt: task.problem_statement.clone(),
            working_dir: working_dir.to_path_buf(),
            allowed_tools: ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            max_turns: self.max_turns,
            model: self.model.clone(),
            env: self.env.clone(),
        };

        logger.record_message(
            &format!(
                "Starting agent session ({}) in {}",
                self.runtime.name(),
                working_dir.display()
            ),
            LogLevel::Info,
        )?;
        logger.record_conversation(Role::User, task.problem_statement.as_str())?;

        let mut stream = match self.runtime.open(request).await {
            Ok(stream) => stream,
            Err(e) => {
                record_abort(logger, &e);
                return Err(e);
            }
        };

        let mut outcome = SessionOutcome::default();
        let mut assistant_turns: u32 = 0;

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    record_abort(logger, &e);
                    return Err(e);
                }
            };

            match event {
                AgentEvent::Assistant { blocks } => {
                    assistant_turns += 1;
                    let message: Vec<MessageBlock> =
                        blocks.iter().map(ContentBlock::to_message_block).collect();
                    logger.record_conversation(Role::Assistant, message)?;
                }
                AgentEvent::ToolStarted { id, name, input } => {
                    logger.record_message(&describe_tool_call(&name, &input), LogLevel::Debug)?;
                    let entry = ToolLogEntry::pre(name, input, Some(id));
                    record_tool(logger, &entry)?;
                }
                AgentEvent::ToolFinished {
                    id,
                    name,
                    output,
                    error,
                } => {
                    if let Some(err) = &error {
                        logger.record_message(
                            &format!("TOOL ERROR: {}: {}", name, truncate(err, 500)),
                            LogLevel::Error,
                        )?;
                    }
                    let entry = ToolLogEntry::post(name, output, Some(id), error);
                    record_tool(logger, &entry)?;
                }
                AgentEvent::Result {
                    usage,
                    is_error,
                    num_turns,
                } => {
                    outcome.total_tokens = usage.total();
                    outcome.num_turns = num_turns;
                    logger.record_message(
                        &format!(
                            "Token usage: input={}, output={}, cache_creation={}, cache_read={}, total={}",
                            usage.input_tokens,
                            usage.output_tokens,
                            usage.cache_creation_input_tokens,
                            usage.cache_read_input_tokens,
                            outcome.total_tokens
                        ),
                        LogLevel::Info,
                    )?;
                    if is_error {
                        logger.record_message(
                            "Agent session ended with an error result",
                            LogLevel::Warn,
                        )?;
                    }
                    break;
                }
            }

            if assistant_turns > self.max_turns {
                logger.record_message(
                    &format!("Turn budget of {} exhausted, stopping session", self.max_turns),
                    LogLevel::Warn,
                )?;
                break;
            }
        }

        if outcome.num_turns == 0 {
            outcome.num_turns = assistant_turns;
        }
        outcome.stats = logger.snapshot_stats();
        logger.record_message(
            &format!(
                "Agent session finished: {} tool calls, {} tokens",
                outcome.stats.total_tool_calls, outcome.total_tokens
            ),
            LogLevel::Info,
        )?;
        Ok(outcome)
    }
}

/// Records a tool entry. Pairing violations reported by the runtime are
/// logged and skipped; I/O failures abort the session.
fn record_tool(logger: &mut TaskLogger, entry: &ToolLogEntry) -> Result<(), AgentSessionError> {
    match logger.record_tool_call(entry) {
        Ok(()) => Ok(()),
        Err(e @ (RecorderError::UnmatchedPost { .. } | RecorderError::DuplicatePre { .. })) => {
            logger.record_message(&format!("Skipping tool entry: {e}"), LogLevel::Warn)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Records a session failure and closes the tool invocations it left open.
/// Write failures here are only logged; the session error wins.
fn record_abort(logger: &mut TaskLogger, err: &AgentSessionError) {
    if let Err(e) = logger.record_message(&format!("Agent session failed: {err}"), LogLevel::Error) {
        warn!(instance_id = %logger.instance_id(), error = %e, "Failed to record session failure");
    }
    close_open_calls(logger);
}

/// Writes an error `post` for every open tool invocation; failures are logged.
pub fn close_open_calls(logger: &mut TaskLogger) {
    match logger.close_open_calls(SESSION_ABORTED) {
        Ok(0) => {}
        Ok(n) => warn!(instance_id = %logger.instance_id(), open = n, "Closed unfinished tool calls"),
        Err(e) => warn!(
            instance_id = %logger.instance_id(),
            error = %e,
            "Failed to close unfinished tool calls"
        ),
    }
}

/// Human-readable line for a tool invocation.
pub fn describe_tool_call(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str()).unwrap_or_default();
    match name {
        "Bash" => format!("TOOL CALL: {}: {}", name, truncate(field("command"), 100)),
        "Read" | "Write" | "Edit" => format!("TOOL CALL: {}: {}", name, field("file_path")),
        _ => format!("TOOL CALL: {}", name),
    }
}
