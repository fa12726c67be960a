//! Full-text search and session/project listing over the SQLite index.
//!
//! Keyword search runs through the `records_fts` FTS5 table and joins back to
//! `records` for metadata. Listings read the `sessions` table directly.
//! Project filters accept the substring, glob and regex forms described in
//! [`crate::pattern`].

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::SearchConfig;
use crate::error::{resolve_prefix, Error, Result};
use crate::models::{
    millis_to_datetime, ProjectInfo, RecordKind, Role, SearchResult, SessionInfo,
};
use crate::pattern::ProjectPattern;

/// Filters shared by search and session listing. `role` and `kind` only apply
/// to record search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub project: Option<ProjectPattern>,
    pub role: Option<Role>,
    pub kind: Option<RecordKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Exact id or prefix; resolved before the query runs.
    pub session: Option<String>,
    pub limit: Option<i64>,
}

/// Rewrite free text into a safe FTS5 expression.
///
/// Every bare word becomes a quoted string, so punctuation such as `-`, `:`
/// or `/` is tokenized instead of parsed as column filters. `"phrases"`, a
/// trailing `*` (prefix match) and the `AND`/`OR`/`NOT` operators are kept.
/// Words without any letter or digit are dropped.
pub fn sanitize_fts_query(query: &str) -> String {
    let cleaned = query.replace(['?', '^', '~'], " ");
    let mut terms: Vec<String> = Vec::new();
    let mut rest = cleaned.as_str();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        if let Some(after) = rest.strip_prefix('"') {
            let (phrase, tail) = after.split_once('"').unwrap_or((after, ""));
            let (prefix, tail) = match tail.strip_prefix('*') {
                Some(tail) => (true, tail),
                None => (false, tail),
            };
            let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
            if let Some(term) = quote_fts_term(&phrase, prefix) {
                terms.push(term);
            }
            rest = tail;
            continue;
        }

        let end = rest
            .find(|c: char| c.is_whitespace() || c == '"')
            .unwrap_or(rest.len());
        let (word, tail) = rest.split_at(end);
        rest = tail;

        if matches!(word, "AND" | "OR" | "NOT") {
            // operators need a term on both sides
            if terms.last().is_some_and(|t| !is_fts_operator(t)) {
                terms.push(word.to_string());
            }
            continue;
        }
        let stem = word.trim_end_matches('*');
        if let Some(term) = quote_fts_term(stem, stem.len() < word.len()) {
            terms.push(term);
        }
    }

    while terms.last().is_some_and(|t| is_fts_operator(t)) {
        terms.pop();
    }
    terms.join(" ")
}

fn quote_fts_term(text: &str, prefix: bool) -> Option<String> {
    if !text.chars().any(char::is_alphanumeric) {
        return None;
    }
    let star = if prefix { "*" } else { "" };
    Some(format!("\"{}\"{}", text.replace('"', "\"\""), star))
}

fn is_fts_operator(term: &str) -> bool {
    matches!(term, "AND" | "OR" | "NOT")
}

pub async fn search(
    pool: &SqlitePool,
    config: &SearchConfig,
    query: &str,
    filter: &SearchFilter,
) -> Result<Vec<SearchResult>> {
    let fts_query = sanitize_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let session_id = match &filter.session {
        Some(raw) => Some(resolve_session_id(pool, raw, config.min_prefix_len).await?),
        None => None,
    };
    let project = match &filter.project {
        Some(pattern) => Some(pattern.resolve(pool).await?),
        None => None,
    };

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT r.session_id, r.project, r.role, r.kind, r.timestamp, r.line_number, r.content,
               snippet(records_fts, 2, '>>>', '<<<', '...', 32) AS snippet,
               bm25(records_fts) AS rank
        FROM records_fts
        JOIN records r ON r.id = CAST(records_fts.record_id AS INTEGER)
        WHERE records_fts MATCH "#,
    );
    qb.push_bind(fts_query.clone());

    if let Some(predicate) = &project {
        predicate.push_and(&mut qb, "r.project");
    }
    if let Some(role) = filter.role {
        qb.push(" AND r.role = ").push_bind(role.as_str());
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND r.kind = ").push_bind(kind.as_str());
    }
    if let Some(since) = filter.since {
        qb.push(" AND r.timestamp >= ")
            .push_bind(since.timestamp_millis());
    }
    if let Some(until) = filter.until {
        qb.push(" AND r.timestamp <= ")
            .push_bind(until.timestamp_millis());
    }
    if let Some(id) = session_id {
        qb.push(" AND r.session_id = ").push_bind(id);
    }

    let limit = filter.limit.unwrap_or(config.default_limit);
    qb.push(" ORDER BY rank ASC, r.timestamp DESC, r.line_number ASC LIMIT ")
        .push_bind(limit);

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .map_err(|e| classify_query_error(&fts_query, e))?;

    Ok(rows
        .iter()
        .map(|row| SearchResult {
            session_id: row.get("session_id"),
            project: row.get("project"),
            role: row.get("role"),
            kind: row.get("kind"),
            timestamp: millis_to_datetime(row.get("timestamp")),
            line_number: row.get("line_number"),
            snippet: row.get("snippet"),
            content: row.get("content"),
        })
        .collect())
}

/// FTS5 grammar errors are the caller's fault; everything else is a storage error.
fn classify_query_error(query: &str, err: sqlx::Error) -> Error {
    let message = err.to_string();
    let invalid = [
        "fts5: syntax error",
        "malformed MATCH",
        "no such column",
        "unterminated string",
        "unknown special query",
    ];
    if invalid.iter().any(|needle| message.contains(needle)) {
        Error::InvalidQuery {
            query: query.to_string(),
            reason: message,
        }
    } else if message.contains("no such table") {
        Error::IndexMissing
    } else {
        Error::Database(err)
    }
}

const SESSION_COLUMNS: &str = "session_id, project, slug, first_message, started_at, \
                               last_active_at, message_count, file_path";

fn session_info_from_row(row: &SqliteRow) -> SessionInfo {
    SessionInfo {
        session_id: row.get("session_id"),
        project: row.get("project"),
        slug: row.get("slug"),
        first_message: row.get("first_message"),
        started_at: millis_to_datetime(row.get("started_at")),
        last_active_at: millis_to_datetime(row.get("last_active_at")),
        message_count: row.get("message_count"),
        file_path: row.get("file_path"),
    }
}

/// Sessions matching the filter, most recently active first. A session
/// matches a date window when its activity overlaps it.
pub async fn list_sessions(pool: &SqlitePool, filter: &SearchFilter) -> Result<Vec<SessionInfo>> {
    let project = match &filter.project {
        Some(pattern) => Some(pattern.resolve(pool).await?),
        None => None,
    };

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM sessions WHERE 1", SESSION_COLUMNS));
    if let Some(predicate) = &project {
        predicate.push_and(&mut qb, "project");
    }
    if let Some(since) = filter.since {
        qb.push(" AND last_active_at >= ")
            .push_bind(since.timestamp_millis());
    }
    if let Some(until) = filter.until {
        qb.push(" AND started_at <= ")
            .push_bind(until.timestamp_millis());
    }
    qb.push(" ORDER BY last_active_at DESC, session_id ASC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(session_info_from_row).collect())
}

pub async fn recent_sessions(pool: &SqlitePool, n: i64) -> Result<Vec<SessionInfo>> {
    list_sessions(
        pool,
        &SearchFilter {
            limit: Some(n),
            ..SearchFilter::default()
        },
    )
    .await
}

/// Look up one session by exact id.
pub async fn get_session_info(pool: &SqlitePool, session_id: &str) -> Result<SessionInfo> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM sessions WHERE session_id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref()
        .map(session_info_from_row)
        .ok_or_else(|| Error::not_found("session", session_id))
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<ProjectInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT project,
               COUNT(*) AS session_count,
               COALESCE(SUM(message_count), 0) AS message_count,
               MIN(started_at) AS first_active_at,
               MAX(last_active_at) AS last_active_at
        FROM sessions
        GROUP BY project
        ORDER BY last_active_at DESC, project ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ProjectInfo {
            name: row.get("project"),
            session_count: row.get("session_count"),
            message_count: row.get("message_count"),
            first_active_at: millis_to_datetime(row.get("first_active_at")),
            last_active_at: millis_to_datetime(row.get("last_active_at")),
        })
        .collect())
}

/// Resolve a user-supplied session id. Exact ids always win; otherwise the
/// input must be at least `min_prefix_len` characters and prefix exactly one id.
pub async fn resolve_session_id(
    pool: &SqlitePool,
    raw: &str,
    min_prefix_len: usize,
) -> Result<String> {
    let raw = raw.trim();

    let exact: Option<String> =
        sqlx::query_scalar("SELECT session_id FROM sessions WHERE session_id = ?")
            .bind(raw)
            .fetch_optional(pool)
            .await?;
    if let Some(id) = exact {
        return Ok(id);
    }

    let len = raw.chars().count();
    if len < min_prefix_len {
        return Err(Error::PrefixTooShort {
            kind: "session",
            prefix: raw.to_string(),
            min: min_prefix_len,
        });
    }

    let matches: Vec<String> = sqlx::query_scalar(
        "SELECT session_id FROM sessions WHERE substr(session_id, 1, ?) = ? ORDER BY session_id LIMIT 20",
    )
    .bind(len as i64)
    .bind(raw)
    .fetch_all(pool)
    .await?;

    resolve_prefix("session", raw, matches)
}

/// Parse a `YYYY-MM-DD` date into the first (or last) millisecond of that day, UTC.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        Error::InvalidQuery {
            query: raw.to_string(),
            reason: format!("expected YYYY-MM-DD: {}", e),
        }
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time).and_utc())
}
