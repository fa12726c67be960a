//! Message-aligned session chunker.
//!
//! Splits a session's messages into [`Chunk`]s that fit a token budget so
//! each one can be handed to the reasoning service on its own. Boundaries
//! always fall between messages: a message is never split, and every message
//! lands in exactly one chunk. A single message larger than the budget
//! becomes a chunk by itself, flagged `oversized`.
//!
//! Token counts are estimated at four characters per token.

use std::ops::Range;

use crate::models::{ContentBlock, Message, Session};

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 50_000;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed overhead charged for each tool use on top of its input JSON.
const TOOL_USE_OVERHEAD: usize = 50;

/// Per-message cap when rendering a chunk for the reasoning service.
const RENDER_MESSAGE_CHARS: usize = 5_000;

/// A contiguous run of one session's messages.
#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub session_id: &'a str,
    pub project: &'a str,
    /// Position within the session, starting at 0.
    pub index: usize,
    pub messages: &'a [Message],
    pub token_estimate: usize,
    pub oversized: bool,
}

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut total = message.thinking.as_deref().map(estimate_tokens).unwrap_or(0);
    for block in &message.blocks {
        total += match block {
            ContentBlock::Text { text } => estimate_tokens(text),
            ContentBlock::ToolResult { content, .. } => estimate_tokens(content),
            ContentBlock::ToolUse { input, .. } => {
                estimate_tokens(&input.to_string()) + TOOL_USE_OVERHEAD
            }
            // Code blocks duplicate text already counted above.
            ContentBlock::Code(_) => 0,
        };
    }
    total
}

/// Greedily pack a session's messages into chunks of at most `budget` tokens.
/// An empty session yields no chunks.
pub fn chunk_session(session: &Session, budget: usize) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut tokens = 0;

    for (i, message) in session.messages.iter().enumerate() {
        let cost = estimate_message_tokens(message);
        if i > start && tokens + cost > budget {
            chunks.push(make_chunk(session, chunks.len(), start..i, tokens, budget));
            start = i;
            tokens = 0;
        }
        tokens += cost;
        if tokens > budget {
            // Only reachable when this message starts the chunk.
            chunks.push(make_chunk(session, chunks.len(), start..i + 1, tokens, budget));
            start = i + 1;
            tokens = 0;
        }
    }
    if start < session.messages.len() {
        let end = session.messages.len();
        chunks.push(make_chunk(session, chunks.len(), start..end, tokens, budget));
    }

    chunks
}

fn make_chunk(
    session: &Session,
    index: usize,
    range: Range<usize>,
    tokens: usize,
    budget: usize,
) -> Chunk<'_> {
    Chunk {
        session_id: &session.id,
        project: &session.project,
        index,
        messages: &session.messages[range],
        token_estimate: tokens,
        oversized: tokens > budget,
    }
}

/// Chunk several sessions, keeping each session's chunks together and in order.
pub fn chunk_sessions(sessions: &[Session], budget: usize) -> Vec<Chunk<'_>> {
    sessions
        .iter()
        .flat_map(|session| chunk_session(session, budget))
        .collect()
}

impl Chunk<'_> {
    /// Render for the reasoning service. `total` is the number of chunks in
    /// the owning session.
    pub fn to_text(&self, total: usize) -> String {
        let mut out = format!(
            "=== Session {} | project {} | part {}/{} ===\n",
            self.session_id,
            self.project,
            self.index + 1,
            total
        );
        for message in self.messages {
            out.push_str(&format!("\n[{} #{}", message.role, message.line_number));
            if let Some(ts) = message.timestamp {
                out.push_str(&format!(" {}", ts.format("%Y-%m-%d %H:%M")));
            }
            out.push_str("]\n");

            let text = message.text();
            if text.chars().count() > RENDER_MESSAGE_CHARS {
                let head: String = text.chars().take(RENDER_MESSAGE_CHARS).collect();
                out.push_str(&head);
                out.push_str("\n... [truncated]");
            } else {
                out.push_str(&text);
            }
            out.push('\n');

            let tools: Vec<&str> = message.tool_names().collect();
            if !tools.is_empty() {
                out.push_str(&format!("[tools: {}]\n", tools.join(", ")));
            }
        }
        out
    }
}
