//! Error types for the library surface.
//!
//! Per-line [`ParseError`]s are soft: they are collected into parse reports
//! and never abort a file. Everything else surfaces through [`Error`].

use serde::Serialize;
use thiserror::Error;

use crate::reasoning::ServiceError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A transcript line that could not be decoded.
#[derive(Debug, Clone, Serialize, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to index session {session_id}: {source}")]
    Index {
        session_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} id '{prefix}' is ambiguous; candidates: {}", candidates.join(", "))]
    AmbiguousId {
        kind: &'static str,
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("{kind} id prefix '{prefix}' is shorter than the minimum of {min} characters")]
    PrefixTooShort {
        kind: &'static str,
        prefix: String,
        min: usize,
    },

    #[error("invalid project pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("invalid search query '{query}': {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error(transparent)]
    ExternalService(#[from] ServiceError),

    #[error("analysis failed: all {} task(s) failed ({})", reasons.len(), reasons.join("; "))]
    AnalysisFailure { reasons: Vec<String> },

    #[error("analysis cancelled after {} completed task(s)", completed.len())]
    Cancelled {
        completed: Vec<crate::analysis::TaskFinding>,
    },

    #[error("search index not found; run `convo sync` first")]
    IndexMissing,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn index(session_id: &str, source: Error) -> Self {
        Error::Index {
            session_id: session_id.to_string(),
            source: Box::new(source),
        }
    }
}

/// Resolve a raw id against the candidate ids that share it as a prefix.
///
/// `matches` must already be restricted to ids starting with `raw`. An exact
/// hit wins over longer ids sharing the prefix.
pub(crate) fn resolve_prefix(
    kind: &'static str,
    raw: &str,
    mut matches: Vec<String>,
) -> Result<String> {
    if let Some(exact) = matches.iter().find(|id| id.as_str() == raw) {
        return Ok(exact.clone());
    }
    match matches.len() {
        0 => Err(Error::not_found(kind, raw)),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort();
            Err(Error::AmbiguousId {
                kind,
                prefix: raw.to_string(),
                candidates: matches,
            })
        }
    }
}
