//! External agent runtime seam and the agent CLI implementation.

use std::path::PathBuf;
use std::process::Stdio;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::events::AgentEvent;
use super::stream::{parse_line, StreamTranslator};
use crate::error::AgentSessionError;

/// Ordered events of one session. Ends after the runtime finishes.
pub type EventStream = BoxStream<'static, Result<AgentEvent, AgentSessionError>>;

/// Everything a runtime needs to start a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub system_prompt: String,
    /// First user message (the task's problem statement).
    pub user_prompt: String,
    /// Directory the agent works in.
    pub working_dir: PathBuf,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub model: Option<String>,
    /// Extra environment variables for the runtime process.
    pub env: Vec<(String, String)>,
}

/// An external agent that can run a session and report events.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Starts a session and returns its event stream.
    async fn open(&self, request: SessionRequest) -> Result<EventStream, AgentSessionError>;
}

/// Default agent CLI program.
pub const DEFAULT_AGENT_PROGRAM: &str = "claude";

/// Runs the agent CLI in print mode and parses its stream-json output.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    program: String,
}

impl ClaudeCliRuntime {
    pub fn new() -> Self {
        Self {
            program: DEFAULT_AGENT_PROGRAM.to_string(),
        }
    }

    /// Uses a different executable (path or name on `PATH`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Command-line arguments for a session.
    pub fn build_args(&self, request: &SessionRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.user_prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--system-prompt".to_string(),
            request.system_prompt.clone(),
            "--allowedTools".to_string(),
            request.allowed_tools.join(","),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
        ];
        if let Some(model) = &request.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

impl Default for ClaudeCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    async fn open(&self, request: SessionRequest) -> Result<EventStream, AgentSessionError> {
        let args = self.build_args(&request);
        info!(
            program = %self.program,
            working_dir = %request.working_dir.display(),
            max_turns = request.max_turns,
            "Launching agent runtime"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.working_dir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentSessionError::Launch {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| AgentSessionError::Launch {
            program: self.program.clone(),
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stream = stream! {
            let mut lines = BufReader::new(stdout).lines();
            let mut translator = StreamTranslator::new();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(parsed) = parse_line(&line) {
                            for event in translator.translate(parsed) {
                                yield Ok::<_, AgentSessionError>(event);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(AgentSessionError::Stream(format!("failed to read agent output: {e}")));
                        return;
                    }
                }
            }

            let status = match child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    yield Err(AgentSessionError::Io(e));
                    return;
                }
            };
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            debug!(status = %status, "Agent runtime exited");

            if !status.success() && !translator.saw_result() {
                yield Err(AgentSessionError::RuntimeExited {
                    code: status.code().unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                });
            }
        };

        Ok(Box::pin(stream))
    }
}
