//! Agent session driving.
//!
//! The agent's reasoning lives in an external runtime behind
//! [`AgentRuntime`]. This module renders the system prompt, opens a session,
//! and streams its events through the task's recorder while accumulating
//! token usage.

pub mod driver;
pub mod events;
pub mod prompts;
pub mod runtime;
pub mod stream;

pub use driver::{close_open_calls, describe_tool_call, SessionDriver, SessionOutcome, SESSION_ABORTED};
pub use events::{AgentEvent, ContentBlock, TokenUsage};
pub use prompts::{render_system_prompt, ALLOWED_TOOLS, DEFAULT_MAX_TURNS};
pub use runtime::{AgentRuntime, ClaudeCliRuntime, EventStream, SessionRequest};
