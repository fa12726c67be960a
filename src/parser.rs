//! JSONL transcript parser.
//!
//! A transcript is a sequence of independent JSON records, one per line.
//! `user` and `assistant` records become [`Message`]s; every other record
//! kind is ignored. Lines that fail to decode are recorded as
//! [`ParseError`]s and skipped, so a truncated or partially corrupt file still
//! yields every readable message.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{ParseError, Result};
use crate::models::{CodeBlock, ContentBlock, Message, Role, Session, ToolInvocation, ToolOutcome};

/// Path segments that precede the interesting part of an encoded project dir.
const SKIP_PREFIXES: &[&str] = &["Users", "home", "Work", "Play", "Projects", "github", "repos"];

// ============ Raw record shapes ============

/// One transcript line. `slug` may appear on any record kind.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    slug: Option<String>,
    #[serde(flatten)]
    record: RawRecord,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawRecord {
    User(RawEntry),
    Assistant(RawEntry),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    message: RawMessage,
    timestamp: Option<String>,
    uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    role: Option<String>,
    #[serde(default)]
    content: RawContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawItem>),
}

impl Default for RawContent {
    fn default() -> Self {
        RawContent::Text(String::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawItem {
    Bare(String),
    Block(RawBlock),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Option<serde_json::Value>,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

/// Result of parsing one transcript: the session plus every skipped line.
#[derive(Debug)]
pub struct ParsedTranscript {
    pub session: Session,
    pub errors: Vec<ParseError>,
}

impl ParsedTranscript {
    pub fn skipped_lines(&self) -> usize {
        self.errors.len()
    }
}

/// Parse transcript text into a [`Session`].
///
/// Never fails as a whole: undecodable lines are collected in
/// [`ParsedTranscript::errors`] and parsing continues with the next line.
pub fn parse_transcript(text: &str, session_id: &str, project: &str) -> ParsedTranscript {
    let mut messages: Vec<Message> = Vec::new();
    let mut errors = Vec::new();
    let mut slug: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let raw: RawLine = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(session_id, line = line_number, error = %e, "skipping malformed line");
                errors.push(ParseError {
                    line: line_number,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if slug.is_none() {
            slug = raw.slug;
        }

        let (fallback_role, entry) = match raw.record {
            RawRecord::User(entry) => (Role::User, entry),
            RawRecord::Assistant(entry) => (Role::Assistant, entry),
            RawRecord::Other => continue,
        };

        let role = entry
            .message
            .role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .unwrap_or(fallback_role);

        let (mut blocks, thinking) = convert_content(entry.message.content);
        if role == Role::Assistant {
            let code: Vec<ContentBlock> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .flat_map(|text| extract_code_blocks(text, line_number))
                .map(ContentBlock::Code)
                .collect();
            blocks.extend(code);
        }

        messages.push(Message {
            session_id: session_id.to_string(),
            role,
            line_number,
            timestamp: entry.timestamp.as_deref().and_then(parse_timestamp),
            uuid: entry.uuid,
            blocks,
            thinking,
        });
    }

    let tool_invocations = pair_tool_invocations(&messages);
    let started_at = messages.iter().filter_map(|m| m.timestamp).min();
    let last_active_at = messages.iter().filter_map(|m| m.timestamp).max();

    ParsedTranscript {
        session: Session {
            id: session_id.to_string(),
            project: project.to_string(),
            slug,
            file_path: PathBuf::new(),
            started_at,
            last_active_at,
            messages,
            tool_invocations,
        },
        errors,
    }
}

/// Read and parse a transcript file. The session id is the file stem and the
/// project is derived from the parent directory name.
pub fn parse_session_file(path: &Path) -> Result<ParsedTranscript> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let (session_id, project) = identify(path);
    let mut parsed = parse_transcript(&text, &session_id, &project);
    parsed.session.file_path = path.to_path_buf();
    Ok(parsed)
}

/// Session id and project name for a transcript path.
pub fn identify(path: &Path) -> (String, String) {
    let session_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let project = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| project_name_from_dir(&n.to_string_lossy()))
        .unwrap_or_default();
    (session_id, project)
}

/// Normalize a path-encoded project directory name.
///
/// `-Users-alice-Work-foo-bar` becomes `foo-bar`.
pub fn project_name_from_dir(name: &str) -> String {
    let parts: Vec<&str> = name.split('-').collect();
    let mut kept = Vec::new();
    let mut found = false;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if !found && SKIP_PREFIXES.contains(part) {
            continue;
        }
        // user name directly after "Users"
        if !found && i > 0 && parts[i - 1] == "Users" {
            continue;
        }
        found = true;
        kept.push(*part);
    }

    if kept.is_empty() {
        name.to_string()
    } else {
        kept.join("-")
    }
}

/// Extract fenced code blocks from message text without modifying it.
pub fn extract_code_blocks(text: &str, message_line: usize) -> Vec<CodeBlock> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```([A-Za-z0-9_+#.\-]*)[ \t]*\r?\n(.*?)```").expect("valid fence regex")
    });

    fence
        .captures_iter(text)
        .map(|caps| {
            let language = caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let body = caps
                .get(2)
                .map(|m| m.as_str().trim_end())
                .unwrap_or_default()
                .to_string();
            CodeBlock {
                language,
                body,
                message_line,
            }
        })
        .collect()
}

fn convert_content(content: RawContent) -> (Vec<ContentBlock>, Option<String>) {
    let items = match content {
        RawContent::Text(text) => {
            return (vec![ContentBlock::Text { text }], None);
        }
        RawContent::Blocks(items) => items,
    };

    let mut blocks = Vec::new();
    let mut thinking_parts = Vec::new();

    for item in items {
        match item {
            RawItem::Bare(text) => blocks.push(ContentBlock::Text { text }),
            RawItem::Block(RawBlock::Text { text }) => blocks.push(ContentBlock::Text { text }),
            RawItem::Block(RawBlock::ToolUse { id, name, input }) => {
                blocks.push(ContentBlock::ToolUse { id, name, input })
            }
            RawItem::Block(RawBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            }) => blocks.push(ContentBlock::ToolResult {
                tool_use_id,
                content: flatten_result(content),
                is_error,
            }),
            RawItem::Block(RawBlock::Thinking { thinking }) => thinking_parts.push(thinking),
            RawItem::Block(RawBlock::Unknown) => {}
        }
    }

    let thinking = if thinking_parts.is_empty() {
        None
    } else {
        Some(thinking_parts.join("\n"))
    };
    (blocks, thinking)
}

/// Tool result bodies are either a string or a list of `{type: text}` items.
fn flatten_result(content: Option<serde_json::Value>) -> String {
    match content {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.as_str()),
                serde_json::Value::Object(obj)
                    if obj.get("type").and_then(|t| t.as_str()) == Some("text") =>
                {
                    obj.get("text").and_then(|t| t.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn pair_tool_invocations(messages: &[Message]) -> Vec<ToolInvocation> {
    let mut invocations: Vec<ToolInvocation> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for msg in messages {
        for block in &msg.blocks {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    by_id.insert(id.clone(), invocations.len());
                    invocations.push(ToolInvocation {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                        line_number: msg.line_number,
                        result: None,
                    });
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    if let Some(&idx) = by_id.get(tool_use_id) {
                        let invocation = &mut invocations[idx];
                        if invocation.result.is_none() {
                            invocation.result = Some(ToolOutcome {
                                content: content.clone(),
                                is_error: *is_error,
                                line_number: msg.line_number,
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    invocations
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
