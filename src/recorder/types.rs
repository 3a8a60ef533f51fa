//! Record types written by the task logger.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a line in `agent.log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Whether a tool entry was written before or after the tool ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    Pre,
    Post,
}

/// One line of `tools.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: ToolPhase,
    pub tool_name: String,
    /// Tool arguments. Empty object on `post` entries.
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Pairs a `post` entry with the `pre` entry of the same invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolLogEntry {
    /// Entry written when the agent starts a tool invocation.
    pub fn pre(
        tool_name: impl Into<String>,
        input: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase: ToolPhase::Pre,
            tool_name: tool_name.into(),
            input,
            output: None,
            correlation_id,
            error: None,
        }
    }

    /// Entry written when a tool invocation finishes.
    pub fn post(
        tool_name: impl Into<String>,
        output: serde_json::Value,
        correlation_id: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            phase: ToolPhase::Post,
            tool_name: tool_name.into(),
            input: serde_json::Value::Object(serde_json::Map::new()),
            output: Some(output),
            correlation_id,
            error,
        }
    }
}

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A block of assistant output as stored in `messages.jsonl`.
///
/// Text blocks serialize as `{"type":"text","text":...}`, everything else as
/// `{"type":<kind>,"data":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl MessageBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            data: None,
        }
    }

    pub fn other(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            text: None,
            data: Some(data),
        }
    }
}

/// Message body: plain user text or a list of assistant blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<MessageBlock>),
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<Vec<MessageBlock>> for MessageContent {
    fn from(blocks: Vec<MessageBlock>) -> Self {
        MessageContent::Blocks(blocks)
    }
}

/// One line of `messages.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: MessageContent,
}

/// Running counters for one task instance.
///
/// Incremented per recorded event, never recomputed from the files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_tool_calls: u64,
    pub bash_calls: u64,
    pub read_calls: u64,
    pub write_calls: u64,
    pub edit_calls: u64,
    pub errors: u64,
    pub messages: u64,
}

impl Stats {
    /// Applies one tool entry to the counters.
    pub fn observe_tool(&mut self, entry: &ToolLogEntry) {
        if entry.phase == ToolPhase::Pre {
            self.total_tool_calls += 1;
            match entry.tool_name.to_lowercase().as_str() {
                "bash" => self.bash_calls += 1,
                "read" => self.read_calls += 1,
                "write" => self.write_calls += 1,
                "edit" => self.edit_calls += 1,
                _ => {}
            }
        }
        if entry.error.is_some() {
            self.errors += 1;
        }
    }
}

/// Locations of the three per-instance log files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPaths {
    pub agent_log: PathBuf,
    pub tools_log: PathBuf,
    pub messages_log: PathBuf,
}

impl LogPaths {
    /// Paths under `<log_root>/<instance_id>/`.
    pub fn for_instance(log_root: &Path, instance_id: &str) -> Self {
        let dir = log_root.join(instance_id);
        Self {
            agent_log: dir.join("agent.log"),
            tools_log: dir.join("tools.jsonl"),
            messages_log: dir.join("messages.jsonl"),
        }
    }

    /// The instance directory holding the log files.
    pub fn dir(&self) -> &Path {
        self.agent_log.parent().unwrap_or_else(|| Path::new("."))
    }
}
