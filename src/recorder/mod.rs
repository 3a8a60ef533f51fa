//! Per-task log recording.
//!
//! Every tool call and conversation message of an agent session is appended
//! to files under the instance's log directory as it happens, so a crash
//! mid-session still leaves a usable record.

pub mod logger;
pub mod types;

pub use logger::{read_tool_log, TaskLogger};
pub use types::{
    ConversationMessage, LogLevel, LogPaths, MessageBlock, MessageContent, Role, Stats,
    ToolLogEntry, ToolPhase,
};
