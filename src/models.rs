//! Core data models used throughout Convo Harness.
//!
//! These types represent the sessions, messages, and index records that flow
//! through parsing, indexing, search, and analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!(
                "unknown role '{}': must be user, assistant, or system",
                other
            )),
        }
    }
}

/// A fenced code block lifted out of a message's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub body: String,
    /// Line number of the owning message.
    pub message_line: usize,
}

/// One piece of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Code(CodeBlock),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: String,
    pub role: Role,
    /// 1-based physical line in the transcript.
    pub line_number: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub uuid: Option<String>,
    pub blocks: Vec<ContentBlock>,
    pub thinking: Option<String>,
}

impl Message {
    /// Display text: text blocks and textual tool results, newline-joined.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    pub fn code_blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.iter().filter_map(|block| match block {
            ContentBlock::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// The result half of a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    pub line_number: usize,
}

/// A tool call paired by id with its result. `result` is `None` when the
/// transcript ends before the result was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub line_number: usize,
    pub result: Option<ToolOutcome>,
}

/// One conversation, as parsed from its transcript file.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub project: String,
    pub slug: Option<String>,
    pub file_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Session {
    /// First line of the first non-empty user message, capped at 100 chars.
    pub fn first_message(&self) -> Option<String> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.text())
            .find(|text| !text.trim().is_empty())
            .map(|text| {
                let first_line = text.trim().lines().next().unwrap_or_default().to_string();
                if first_line.chars().count() > 100 {
                    let head: String = first_line.chars().take(97).collect();
                    format!("{}...", head)
                } else {
                    first_line
                }
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Message,
    Code,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::Code => "code",
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(RecordKind::Message),
            "code" => Ok(RecordKind::Code),
            other => Err(format!("unknown kind '{}': must be message or code", other)),
        }
    }
}

/// One denormalized, independently searchable row.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub session_id: String,
    pub project: String,
    pub role: Role,
    pub kind: RecordKind,
    pub language: Option<String>,
    pub content: String,
    pub line_number: i64,
    /// Unix milliseconds.
    pub timestamp: Option<i64>,
}

impl IndexRecord {
    /// Message-level records for every non-empty message, plus one code-level
    /// record per extracted code block.
    pub fn from_session(session: &Session) -> Vec<IndexRecord> {
        let mut records = Vec::new();
        for msg in &session.messages {
            let timestamp = msg.timestamp.map(|ts| ts.timestamp_millis());
            let text = msg.text();
            if !text.trim().is_empty() {
                records.push(IndexRecord {
                    session_id: session.id.clone(),
                    project: session.project.clone(),
                    role: msg.role,
                    kind: RecordKind::Message,
                    language: None,
                    content: text,
                    line_number: msg.line_number as i64,
                    timestamp,
                });
            }
            for code in msg.code_blocks() {
                records.push(IndexRecord {
                    session_id: session.id.clone(),
                    project: session.project.clone(),
                    role: msg.role,
                    kind: RecordKind::Code,
                    language: code.language.clone(),
                    content: code.body.clone(),
                    line_number: msg.line_number as i64,
                    timestamp,
                });
            }
        }
        records
    }
}

/// A search hit returned from the query engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub session_id: String,
    pub project: String,
    pub role: String,
    pub kind: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub line_number: i64,
    pub snippet: String,
    pub content: String,
}

/// Summary row for one indexed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub project: String,
    pub slug: Option<String>,
    pub first_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub file_path: String,
}

/// Aggregate statistics for one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub session_count: i64,
    pub message_count: i64,
    pub first_active_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

pub(crate) fn millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}
