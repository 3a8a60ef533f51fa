//! Runtime-neutral agent events.

use serde::{Deserialize, Serialize};

use crate::recorder::MessageBlock;

/// Token counts reported at the end of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Input + output + cache creation + cache read.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

/// A block of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Any other block kind, kept as raw JSON.
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

impl ContentBlock {
    /// Parses a raw content block; unknown kinds become [`ContentBlock::Other`].
    pub fn from_value(value: serde_json::Value) -> Self {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown")
            .to_string();

        match kind.as_str() {
            "text" => {
                let text = value
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                ContentBlock::Text(text)
            }
            "tool_use" => {
                let name = value.get("name").and_then(|v| v.as_str());
                match name {
                    Some(name) => ContentBlock::ToolUse {
                        id: value
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple())),
                        name: name.to_string(),
                        input: value
                            .get("input")
                            .cloned()
                            .unwrap_or(serde_json::Value::Null),
                    },
                    None => ContentBlock::Other { kind, data: value },
                }
            }
            _ => ContentBlock::Other { kind, data: value },
        }
    }

    /// Form stored in `messages.jsonl`.
    pub fn to_message_block(&self) -> MessageBlock {
        match self {
            ContentBlock::Text(text) => MessageBlock::text(text.clone()),
            ContentBlock::ToolUse { id, name, input } => MessageBlock::other(
                "tool_use",
                serde_json::json!({ "id": id, "name": name, "input": input }),
            ),
            ContentBlock::Other { kind, data } => MessageBlock::other(kind.clone(), data.clone()),
        }
    }
}

/// What an agent session reports, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An assistant turn. Precedes the `ToolStarted` events for its tool uses.
    Assistant { blocks: Vec<ContentBlock> },
    ToolStarted {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolFinished {
        id: String,
        name: String,
        output: serde_json::Value,
        error: Option<String>,
    },
    /// Final event of a session.
    Result {
        usage: TokenUsage,
        is_error: bool,
        num_turns: u32,
    },
}
