//! Incremental transcript indexing.
//!
//! Keeps the SQLite index synchronized with the transcript tree:
//! discovery (walkdir + globset) → fingerprint comparison → parse →
//! per-session transactional replace. Unchanged transcripts are skipped
//! entirely, so a sync with no file changes performs zero writes.
//!
//! The indexer assumes it is the only writer. Running two syncs against the
//! same database at once is not supported.

use chrono::Utc;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::{Config, TranscriptsConfig};
use crate::error::{Error, Result};
use crate::models::IndexRecord;
use crate::parser::{self, ParsedTranscript};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Change fingerprint of a transcript file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime_ns: i64,
    pub size: i64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let mtime_ns = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        Ok(Self {
            mtime_ns,
            size: metadata.len() as i64,
        })
    }
}

/// A transcript file found on disk.
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    pub path: PathBuf,
    pub session_id: String,
    pub project: String,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Reindex every transcript regardless of fingerprint.
    pub force: bool,
    /// Count what would change without writing.
    pub dry_run: bool,
    /// Remove sessions whose transcript file no longer exists.
    pub prune: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            prune: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub session_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub discovered: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub pruned: usize,
    /// Malformed transcript lines skipped across all indexed sessions.
    pub parse_errors: usize,
    pub failures: Vec<SyncFailure>,
    pub dry_run: bool,
}

impl SyncReport {
    /// True when the pass wrote nothing to the index.
    pub fn is_noop(&self) -> bool {
        self.indexed == 0 && self.pruned == 0
    }
}

struct StoredFingerprint {
    fingerprint: Fingerprint,
    file_path: String,
}

/// Bring the index up to date with the transcript tree.
///
/// Per-session failures are collected in [`SyncReport::failures`] and leave
/// that session at its previously indexed state; they do not abort the pass.
pub async fn sync(
    pool: &SqlitePool,
    config: &Config,
    options: &SyncOptions,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    let transcripts = &config.transcripts;
    progress.report(ProgressEvent::Discovering {
        root: transcripts.root.display().to_string(),
    });

    let files = discover_transcripts(transcripts)?;
    let stored = load_fingerprints(pool).await?;

    let mut report = SyncReport {
        discovered: files.len(),
        dry_run: options.dry_run,
        ..Default::default()
    };
    let total = files.len() as u64;
    let mut seen: HashSet<&str> = HashSet::new();

    for (i, file) in files.iter().enumerate() {
        seen.insert(file.session_id.as_str());
        progress.report(ProgressEvent::Indexing {
            n: i as u64 + 1,
            total,
            session_id: file.session_id.clone(),
        });

        let fingerprint = match Fingerprint::of(&file.path) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::warn!(session_id = %file.session_id, error = %e, "cannot stat transcript");
                report.failures.push(SyncFailure {
                    session_id: file.session_id.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let path_str = file.path.display().to_string();
        let unchanged = stored.get(&file.session_id).is_some_and(|s| {
            s.fingerprint == fingerprint && s.file_path == path_str
        });
        if unchanged && !options.force {
            report.skipped += 1;
            continue;
        }

        if options.dry_run {
            report.indexed += 1;
            continue;
        }

        match index_file(pool, file, fingerprint).await {
            Ok(skipped_lines) => {
                report.indexed += 1;
                report.parse_errors += skipped_lines;
            }
            Err(e) => {
                tracing::warn!(session_id = %file.session_id, error = %e, "indexing failed, previous state kept");
                report.failures.push(SyncFailure {
                    session_id: file.session_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if options.prune {
        for (session_id, entry) in &stored {
            if seen.contains(session_id.as_str()) || Path::new(&entry.file_path).exists() {
                continue;
            }
            if !options.dry_run {
                delete_session(pool, session_id).await?;
            }
            tracing::debug!(%session_id, "pruned session with missing transcript");
            report.pruned += 1;
        }
    }

    tracing::info!(
        discovered = report.discovered,
        indexed = report.indexed,
        skipped = report.skipped,
        pruned = report.pruned,
        failed = report.failures.len(),
        dry_run = report.dry_run,
        "sync complete"
    );

    Ok(report)
}

/// Parse one transcript and replace its indexed state.
///
/// Returns the number of malformed lines skipped by the parser.
pub async fn index_file(
    pool: &SqlitePool,
    file: &TranscriptFile,
    fingerprint: Fingerprint,
) -> Result<usize> {
    let parsed =
        parser::parse_session_file(&file.path).map_err(|e| Error::index(&file.session_id, e))?;
    index_session(pool, &parsed, fingerprint)
        .await
        .map_err(|e| Error::index(&file.session_id, e))?;
    Ok(parsed.skipped_lines())
}

/// Atomically replace all rows belonging to one session.
///
/// Readers see either the complete old row set or the complete new one.
pub async fn index_session(
    pool: &SqlitePool,
    parsed: &ParsedTranscript,
    fingerprint: Fingerprint,
) -> Result<()> {
    let session = &parsed.session;
    let mut tx = pool.begin().await?;

    delete_session_rows(&mut tx, &session.id).await?;

    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, project, slug, first_message, started_at, last_active_at,
                              message_count, file_path, file_mtime_ns, file_size, skipped_lines, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.id)
    .bind(&session.project)
    .bind(&session.slug)
    .bind(session.first_message())
    .bind(session.started_at.map(|ts| ts.timestamp_millis()))
    .bind(session.last_active_at.map(|ts| ts.timestamp_millis()))
    .bind(session.messages.len() as i64)
    .bind(session.file_path.display().to_string())
    .bind(fingerprint.mtime_ns)
    .bind(fingerprint.size)
    .bind(parsed.skipped_lines() as i64)
    .bind(Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    for record in IndexRecord::from_session(session) {
        let inserted = sqlx::query(
            r#"
            INSERT INTO records (session_id, project, role, kind, language, content, line_number, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.session_id)
        .bind(&record.project)
        .bind(record.role.as_str())
        .bind(record.kind.as_str())
        .bind(&record.language)
        .bind(&record.content)
        .bind(record.line_number)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO records_fts (record_id, session_id, content) VALUES (?, ?, ?)")
            .bind(inserted.last_insert_rowid())
            .bind(&record.session_id)
            .bind(&record.content)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove one session and all of its records.
pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    delete_session_rows(&mut tx, session_id).await?;
    tx.commit().await?;
    Ok(())
}

/// Remove every indexed session. Saved analyses are kept.
pub async fn clear_index(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM records_fts").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

async fn delete_session_rows(conn: &mut SqliteConnection, session_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM records_fts WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM records WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load_fingerprints(pool: &SqlitePool) -> Result<HashMap<String, StoredFingerprint>> {
    let rows = sqlx::query("SELECT session_id, file_path, file_mtime_ns, file_size FROM sessions")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("session_id"),
                StoredFingerprint {
                    fingerprint: Fingerprint {
                        mtime_ns: row.get("file_mtime_ns"),
                        size: row.get("file_size"),
                    },
                    file_path: row.get("file_path"),
                },
            )
        })
        .collect())
}

/// Walk the transcript root and return every matching file, sorted by path.
///
/// A missing root yields no files. When two files share a session id the
/// first by path wins and the rest are ignored with a warning.
pub fn discover_transcripts(config: &TranscriptsConfig) -> Result<Vec<TranscriptFile>> {
    let root = &config.root;
    if !root.exists() {
        tracing::warn!(root = %root.display(), "transcript root does not exist");
        return Ok(Vec::new());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let (session_id, project) = parser::identify(path);
        files.push(TranscriptFile {
            path: path.to_path_buf(),
            session_id,
            project,
        });
    }

    let mut seen = HashSet::new();
    files.retain(|f| {
        let fresh = seen.insert(f.session_id.clone());
        if !fresh {
            tracing::warn!(session_id = %f.session_id, path = %f.path.display(), "duplicate session id ignored");
        }
        fresh
    });

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // `*` stays within one path segment so `*/*.jsonl` means project/session
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| Error::Pattern {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}
