//! Saved analysis results.
//!
//! Results live in the `analyses` table next to the index. The full result is
//! stored as JSON; the scope and finding counts are duplicated into columns so
//! listings never decode the body.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::error::{resolve_prefix, Error, Result};
use crate::models::millis_to_datetime;

/// Listing row: everything but the findings body.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub id: String,
    pub query: String,
    pub projects: Vec<String>,
    pub sessions: Vec<String>,
    pub succeeded: i64,
    pub failed: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// Deterministic id: the first 16 bytes of SHA-256(query + RFC 3339 time),
/// formatted as a UUID.
pub fn analysis_id(query: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Insert or overwrite the result stored under `result.id`.
pub async fn save_analysis(pool: &SqlitePool, result: &AnalysisResult) -> Result<()> {
    let body = serde_json::to_string(result)?;
    let projects = serde_json::to_string(&result.scope.projects)?;
    let sessions = serde_json::to_string(&result.sessions)?;

    sqlx::query(
        r#"
        INSERT INTO analyses (id, query, projects_json, sessions_json, succeeded, failed, result_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            query = excluded.query,
            projects_json = excluded.projects_json,
            sessions_json = excluded.sessions_json,
            succeeded = excluded.succeeded,
            failed = excluded.failed,
            result_json = excluded.result_json,
            created_at = excluded.created_at
        "#,
    )
    .bind(&result.id)
    .bind(&result.query)
    .bind(projects)
    .bind(sessions)
    .bind(result.succeeded() as i64)
    .bind(result.failed() as i64)
    .bind(body)
    .bind(result.created_at.timestamp_millis())
    .execute(pool)
    .await?;

    tracing::debug!(id = %result.id, "saved analysis");
    Ok(())
}

/// Exact id or unambiguous prefix of any non-zero length.
pub async fn resolve_analysis_id(pool: &SqlitePool, raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::PrefixTooShort {
            kind: "analysis",
            prefix: String::new(),
            min: 1,
        });
    }

    let matches: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM analyses WHERE substr(id, 1, ?) = ? ORDER BY id LIMIT 20",
    )
    .bind(raw.chars().count() as i64)
    .bind(raw)
    .fetch_all(pool)
    .await?;

    resolve_prefix("analysis", raw, matches)
}

pub async fn load_analysis(pool: &SqlitePool, raw_id: &str) -> Result<AnalysisResult> {
    let id = resolve_analysis_id(pool, raw_id).await?;
    let body: String = sqlx::query_scalar("SELECT result_json FROM analyses WHERE id = ?")
        .bind(&id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found("analysis", id.clone()))?;
    Ok(serde_json::from_str(&body)?)
}

/// Newest first.
pub async fn list_analyses(pool: &SqlitePool, limit: i64) -> Result<Vec<AnalysisSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT id, query, projects_json, sessions_json, succeeded, failed, created_at
        FROM analyses
        ORDER BY created_at DESC, id ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<AnalysisSummary> {
            let projects: String = row.get("projects_json");
            let sessions: String = row.get("sessions_json");
            Ok(AnalysisSummary {
                id: row.get("id"),
                query: row.get("query"),
                projects: serde_json::from_str(&projects)?,
                sessions: serde_json::from_str(&sessions)?,
                succeeded: row.get("succeeded"),
                failed: row.get("failed"),
                created_at: millis_to_datetime(row.get("created_at")),
            })
        })
        .collect()
}

/// Remove one saved analysis and return its full id.
pub async fn delete_analysis(pool: &SqlitePool, raw_id: &str) -> Result<String> {
    let id = resolve_analysis_id(pool, raw_id).await?;
    sqlx::query("DELETE FROM analyses WHERE id = ?")
        .bind(&id)
        .execute(pool)
        .await?;
    Ok(id)
}
