//! Append-only per-instance logger.
//!
//! Each task instance owns one [`TaskLogger`]. It writes three files under
//! `<log_root>/<instance_id>/`:
//!
//! - `agent.log`: human-readable lines, `[timestamp] [LEVEL] text`
//! - `tools.jsonl`: one [`ToolLogEntry`] per line
//! - `messages.jsonl`: one [`ConversationMessage`] per line
//!
//! Counters in [`Stats`] are updated as entries are written.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::types::{
    ConversationMessage, LogLevel, LogPaths, MessageContent, Role, Stats, ToolLogEntry, ToolPhase,
};
use crate::error::RecorderError;

/// Durable record of one task instance.
#[derive(Debug)]
pub struct TaskLogger {
    instance_id: String,
    paths: LogPaths,
    stats: Stats,
    /// Correlation ids with a written `pre` entry and no `post` yet, mapped
    /// to the tool name.
    open_calls: BTreeMap<String, String>,
}

impl TaskLogger {
    /// Opens (or reopens) the log directory for an instance.
    ///
    /// The three files are created empty if missing; existing content is kept.
    pub fn open(log_root: &Path, instance_id: &str) -> Result<Self, RecorderError> {
        let paths = LogPaths::for_instance(log_root, instance_id);
        fs::create_dir_all(paths.dir()).map_err(|source| RecorderError::Write {
            path: paths.dir().display().to_string(),
            source,
        })?;

        for path in [&paths.agent_log, &paths.tools_log, &paths.messages_log] {
            open_append(path)?;
        }

        Ok(Self {
            instance_id: instance_id.to_string(),
            paths,
            stats: Stats::default(),
            open_calls: BTreeMap::new(),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Appends a line to `agent.log` and mirrors it to tracing.
    pub fn record_message(&mut self, text: &str, level: LogLevel) -> Result<(), RecorderError> {
        match level {
            LogLevel::Debug => debug!(instance_id = %self.instance_id, "{}", text),
            LogLevel::Info => info!(instance_id = %self.instance_id, "{}", text),
            LogLevel::Warn => warn!(instance_id = %self.instance_id, "{}", text),
            LogLevel::Error => error!(instance_id = %self.instance_id, "{}", text),
        }

        let line = format!("[{}] [{}] {}\n", Utc::now().to_rfc3339(), level, text);
        let mut file = open_append(&self.paths.agent_log)?;
        file.write_all(line.as_bytes())
            .map_err(|source| RecorderError::Write {
                path: self.paths.agent_log.display().to_string(),
                source,
            })
    }

    /// Appends a tool entry to `tools.jsonl` and updates the counters.
    ///
    /// A `post` whose correlation id has no open `pre` is rejected, as is a
    /// second `pre` for an id that is still open. Rejected entries are not
    /// written. Entries without a correlation id are not checked.
    pub fn record_tool_call(&mut self, entry: &ToolLogEntry) -> Result<(), RecorderError> {
        if let Some(id) = &entry.correlation_id {
            match entry.phase {
                ToolPhase::Pre if self.open_calls.contains_key(id) => {
                    return Err(RecorderError::DuplicatePre {
                        correlation_id: id.clone(),
                    });
                }
                ToolPhase::Post if !self.open_calls.contains_key(id) => {
                    return Err(RecorderError::UnmatchedPost {
                        correlation_id: id.clone(),
                    });
                }
                _ => {}
            }
        }

        append_json_line(&self.paths.tools_log, entry)?;

        if let Some(id) = &entry.correlation_id {
            match entry.phase {
                ToolPhase::Pre => {
                    self.open_calls.insert(id.clone(), entry.tool_name.clone());
                }
                ToolPhase::Post => {
                    self.open_calls.remove(id);
                }
            }
        }
        self.stats.observe_tool(entry);
        Ok(())
    }

    /// Appends a conversation message to `messages.jsonl`.
    pub fn record_conversation(
        &mut self,
        role: Role,
        content: impl Into<MessageContent>,
    ) -> Result<(), RecorderError> {
        let message = ConversationMessage {
            timestamp: Utc::now(),
            role,
            content: content.into(),
        };
        append_json_line(&self.paths.messages_log, &message)?;
        self.stats.messages += 1;
        Ok(())
    }

    /// Copy of the current counters.
    pub fn snapshot_stats(&self) -> Stats {
        self.stats
    }

    /// Replaces the counters with ones reported from elsewhere.
    ///
    /// Used when the session ran inside the environment and recorded into
    /// the same files through a different logger.
    pub fn adopt_stats(&mut self, stats: Stats) {
        self.stats = stats;
    }

    pub fn log_paths(&self) -> LogPaths {
        self.paths.clone()
    }

    /// Number of tool invocations started but not finished.
    pub fn open_call_count(&self) -> usize {
        self.open_calls.len()
    }

    /// Writes an error `post` entry for every invocation still open.
    ///
    /// Called when a session ends before its tools report back, so every
    /// `pre` in `tools.jsonl` has a matching `post`. Returns the number of
    /// entries written.
    pub fn close_open_calls(&mut self, reason: &str) -> Result<usize, RecorderError> {
        let open: Vec<(String, String)> = self
            .open_calls
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        for (id, name) in &open {
            let entry = ToolLogEntry::post(
                name.clone(),
                serde_json::Value::Null,
                Some(id.clone()),
                Some(reason.to_string()),
            );
            self.record_tool_call(&entry)?;
        }
        Ok(open.len())
    }
}

fn open_append(path: &Path) -> Result<File, RecorderError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RecorderError::Write {
            path: path.display().to_string(),
            source,
        })
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<(), RecorderError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = open_append(path)?;
    file.write_all(line.as_bytes())
        .map_err(|source| RecorderError::Write {
            path: path.display().to_string(),
            source,
        })
}

/// Reloads all entries from a `tools.jsonl` file. Blank lines are skipped.
pub fn read_tool_log(path: &Path) -> Result<Vec<ToolLogEntry>, RecorderError> {
    let file = File::open(path)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
