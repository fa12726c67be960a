//! Index statistics and health overview.
//!
//! A quick summary of what is indexed: sessions, records by kind, skipped
//! transcript lines, saved analyses, and a per-project breakdown with the
//! time each project was last synced. Used by `convo stats`.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project: String,
    pub sessions: i64,
    pub records: i64,
    /// Unix seconds of the most recent sync touching this project.
    pub last_indexed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub sessions: i64,
    pub message_records: i64,
    pub code_records: i64,
    pub skipped_lines: i64,
    pub analyses: i64,
    pub projects: Vec<ProjectStats>,
}

pub async fn index_stats(pool: &SqlitePool, db_path: &Path) -> Result<IndexStats> {
    let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(pool)
        .await?;

    let message_records: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE kind = 'message'")
            .fetch_one(pool)
            .await?;

    let code_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE kind = 'code'")
        .fetch_one(pool)
        .await?;

    let skipped_lines: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(skipped_lines), 0) FROM sessions")
            .fetch_one(pool)
            .await?;

    let analyses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses")
        .fetch_one(pool)
        .await?;

    // WAL mode keeps recent writes in the -wal file
    let db_size_bytes = [db_path.to_path_buf(), db_path.with_extension("sqlite-wal")]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let rows = sqlx::query(
        r#"
        SELECT s.project,
               COUNT(DISTINCT s.session_id) AS sessions,
               (SELECT COUNT(*) FROM records r WHERE r.project = s.project) AS records,
               MAX(s.indexed_at) AS last_indexed_at
        FROM sessions s
        GROUP BY s.project
        ORDER BY sessions DESC, s.project ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let projects = rows
        .iter()
        .map(|row| ProjectStats {
            project: row.get("project"),
            sessions: row.get("sessions"),
            records: row.get("records"),
            last_indexed_at: row.get("last_indexed_at"),
        })
        .collect();

    Ok(IndexStats {
        db_path: db_path.display().to_string(),
        db_size_bytes,
        sessions,
        message_records,
        code_records,
        skipped_lines,
        analyses,
        projects,
    })
}

pub fn print_stats(stats: &IndexStats) {
    println!("Convo Harness — Index Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", stats.db_path);
    println!("  Size:        {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Sessions:    {}", stats.sessions);
    println!("  Messages:    {}", stats.message_records);
    println!("  Code blocks: {}", stats.code_records);
    println!("  Skipped:     {} malformed line(s)", stats.skipped_lines);
    println!("  Analyses:    {}", stats.analyses);

    if !stats.projects.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<32} {:>8} {:>8}   {}",
            "PROJECT", "SESSIONS", "RECORDS", "LAST SYNC"
        );
        println!("  {}", "-".repeat(72));

        for p in &stats.projects {
            let sync_display = match p.last_indexed_at {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<32} {:>8} {:>8}   {}",
                p.project, p.sessions, p.records, sync_display
            );
        }
    }

    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
