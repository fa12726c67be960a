//! Pull specific content out of one parsed session.
//!
//! Three views, each backing a `convo extract` mode:
//!
//! - code blocks from assistant messages, optionally filtered by language
//! - files written through file-editing tool calls
//! - tool calls, optionally filtered by tool name

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{CodeBlock, Session, ToolInvocation};

/// Tools whose `file_path` input names a file they wrote.
pub const FILE_WRITING_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit"];

/// A file written during the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenFile {
    pub path: String,
    pub tool: String,
    pub line_number: usize,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A tool call with the timestamp of the message that made it.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall<'a> {
    #[serde(flatten)]
    pub invocation: &'a ToolInvocation,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Code blocks in message order. `language` matches case-insensitively;
/// blocks without a language tag never match a filter.
pub fn code_blocks<'a>(session: &'a Session, language: Option<&str>) -> Vec<&'a CodeBlock> {
    session
        .messages
        .iter()
        .flat_map(|m| m.code_blocks())
        .filter(|block| match language {
            Some(wanted) => block
                .language
                .as_deref()
                .is_some_and(|lang| lang.eq_ignore_ascii_case(wanted)),
            None => true,
        })
        .collect()
}

pub fn written_files(session: &Session) -> Vec<WrittenFile> {
    session
        .tool_invocations
        .iter()
        .filter(|call| FILE_WRITING_TOOLS.contains(&call.name.as_str()))
        .filter_map(|call| {
            let path = call.input.get("file_path")?.as_str()?;
            if path.is_empty() {
                return None;
            }
            Some(WrittenFile {
                path: path.to_string(),
                tool: call.name.clone(),
                line_number: call.line_number,
                timestamp: timestamp_at(session, call.line_number),
            })
        })
        .collect()
}

/// Tool calls in transcript order, restricted to `name` when given.
pub fn tool_calls<'a>(session: &'a Session, name: Option<&str>) -> Vec<ToolCall<'a>> {
    session
        .tool_invocations
        .iter()
        .filter(|call| match name {
            Some(wanted) => call.name == wanted,
            None => true,
        })
        .map(|invocation| ToolCall {
            invocation,
            timestamp: timestamp_at(session, invocation.line_number),
        })
        .collect()
}

fn timestamp_at(session: &Session, line_number: usize) -> Option<DateTime<Utc>> {
    session
        .messages
        .iter()
        .find(|m| m.line_number == line_number)
        .and_then(|m| m.timestamp)
}
