//! Session retrieval by id.
//!
//! The index only keeps searchable text, so a full session (tool calls,
//! thinking, code blocks) is re-parsed from its transcript on demand. Used by
//! `convo show` and by the analysis pipeline.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::SearchConfig;
use crate::error::{Error, ParseError, Result};
use crate::models::{Session, SessionInfo};
use crate::parser;
use crate::search;

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub info: SessionInfo,
    pub session: Session,
    pub parse_errors: Vec<ParseError>,
}

/// Resolve `raw_id` (exact id or unambiguous prefix) and load the session
/// from disk. A transcript that vanished since indexing is `NotFound`.
pub async fn load_session(
    pool: &SqlitePool,
    config: &SearchConfig,
    raw_id: &str,
) -> Result<SessionDetail> {
    let session_id = search::resolve_session_id(pool, raw_id, config.min_prefix_len).await?;
    let info = search::get_session_info(pool, &session_id).await?;

    let path = std::path::Path::new(&info.file_path);
    if !path.exists() {
        tracing::warn!(session_id = %session_id, path = %path.display(), "transcript missing on disk");
        return Err(Error::not_found("transcript", info.file_path.clone()));
    }

    let parsed = parser::parse_session_file(path)?;
    let mut session = parsed.session;
    // The stored project name is authoritative even if the directory was renamed.
    session.project = info.project.clone();

    Ok(SessionDetail {
        info,
        session,
        parse_errors: parsed.errors,
    })
}
