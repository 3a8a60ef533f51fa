//! Parsing for the agent CLI's `--output-format stream-json` output.
//!
//! The CLI emits one JSON object per line with a `type` field. Lines are
//! parsed into [`StreamLine`] and then turned into [`AgentEvent`]s by a
//! [`StreamTranslator`], which remembers tool names so that tool results
//! (which only carry the tool use id) can be attributed.

use std::collections::HashMap;

use serde::Deserialize;

use super::events::{AgentEvent, ContentBlock, TokenUsage};
use crate::utils::truncate;

/// One line of stream-json output.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamLine {
    /// Session initialization.
    System {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },

    /// Assistant turn with text and tool invocations.
    Assistant { message: RawMessage },

    /// Tool results fed back to the model.
    User { message: RawUserMessage },

    /// Session complete.
    Result {
        #[serde(default)]
        usage: Option<TokenUsage>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: u32,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawMessage {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawUserMessage {
    pub content: RawUserContent,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawUserContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

/// Parses a single line of NDJSON output.
///
/// Returns `None` for blank lines and for lines that are not stream events
/// (logged at debug level).
pub fn parse_line(line: &str) -> Option<StreamLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamLine>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(
                "Skipping malformed stream line: {} (error: {})",
                truncate(trimmed, 100),
                e
            );
            None
        }
    }
}

/// Turns parsed stream lines into agent events.
#[derive(Debug, Default)]
pub struct StreamTranslator {
    tool_names: HashMap<String, String>,
    saw_result: bool,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a result line has been translated.
    pub fn saw_result(&self) -> bool {
        self.saw_result
    }

    pub fn translate(&mut self, line: StreamLine) -> Vec<AgentEvent> {
        match line {
            StreamLine::Assistant { message } => {
                let blocks: Vec<ContentBlock> = message
                    .content
                    .into_iter()
                    .map(ContentBlock::from_value)
                    .collect();

                let mut events = Vec::with_capacity(blocks.len() + 1);
                let starts: Vec<AgentEvent> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { id, name, input } => {
                            self.tool_names.insert(id.clone(), name.clone());
                            Some(AgentEvent::ToolStarted {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            })
                        }
                        _ => None,
                    })
                    .collect();
                events.push(AgentEvent::Assistant { blocks });
                events.extend(starts);
                events
            }
            StreamLine::User { message } => match message.content {
                RawUserContent::Text(_) => Vec::new(),
                RawUserContent::Blocks(blocks) => blocks
                    .into_iter()
                    .filter_map(|block| self.tool_result(block))
                    .collect(),
            },
            StreamLine::Result {
                usage,
                is_error,
                num_turns,
            } => {
                self.saw_result = true;
                vec![AgentEvent::Result {
                    usage: usage.unwrap_or_default(),
                    is_error,
                    num_turns,
                }]
            }
            StreamLine::System { .. } | StreamLine::Unknown => Vec::new(),
        }
    }

    fn tool_result(&mut self, block: serde_json::Value) -> Option<AgentEvent> {
        if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
            return None;
        }
        let id = block.get("tool_use_id")?.as_str()?.to_string();
        let name = self
            .tool_names
            .remove(&id)
            .unwrap_or_else(|| "Unknown".to_string());
        let output = block
            .get("content")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let is_error = block
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let error = is_error.then(|| result_text(&output));

        Some(AgentEvent::ToolFinished {
            id,
            name,
            output,
            error,
        })
    }
}

/// Flattens tool result content (a string or a list of text blocks) to text.
fn result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
