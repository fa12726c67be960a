//! # Convo Harness CLI (`convo`)
//!
//! The `convo` binary indexes local conversation transcripts, searches them,
//! and runs multi-step analyses over them.
//!
//! ## Usage
//!
//! ```bash
//! convo --config ./config/convo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `convo init` | Create the SQLite database and run schema migrations |
//! | `convo sync` | Index new and changed transcripts |
//! | `convo search "<query>"` | Full-text search over messages and code |
//! | `convo sessions` | List sessions, most recent first |
//! | `convo recent` | The last few sessions |
//! | `convo projects` | List projects with counts |
//! | `convo show <id>` | Print one session (id or prefix) |
//! | `convo extract <id>` | Code blocks, written files, or tool calls from a session |
//! | `convo stats` | Index statistics |
//! | `convo clear` | Drop every indexed session |
//! | `convo analyze "<question>"` | Run an analysis and save it |
//! | `convo analyses list\|show\|delete` | Manage saved analyses |
//!
//! Logs go to stderr and are controlled with `RUST_LOG`; stdout carries only
//! command output so it stays scriptable.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convo_harness::analysis::{AnalysisResult, AnalysisScope, Analyzer, FindingStatus};
use convo_harness::config::{self, Config};
use convo_harness::indexer::{self, SyncOptions};
use convo_harness::models::{ContentBlock, RecordKind, Role, SessionInfo};
use convo_harness::pattern::ProjectPattern;
use convo_harness::progress::ProgressMode;
use convo_harness::reasoning::AnthropicService;
use convo_harness::search::{self, SearchFilter};
use convo_harness::{db, extract, get, migrate, persistence, stats, Error};

/// Convo Harness — index, search, and analyze AI conversation transcripts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "convo",
    about = "Convo Harness — index, search, and analyze AI conversation transcripts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/convo.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index new and changed transcripts.
    ///
    /// Unchanged files (same modification time and size) are skipped, and
    /// sessions whose transcript was deleted are removed from the index.
    Sync {
        /// Reindex every transcript regardless of fingerprint.
        #[arg(long)]
        force: bool,

        /// Show what would change without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Keep sessions whose transcript file no longer exists.
        #[arg(long)]
        no_prune: bool,
    },

    /// Full-text search over messages and code blocks.
    Search {
        query: String,

        /// Project filter: substring, glob (`api-*`), or regex (`re:^api`).
        #[arg(long)]
        project: Option<String>,

        /// user, assistant, or system.
        #[arg(long)]
        role: Option<Role>,

        /// message or code.
        #[arg(long)]
        kind: Option<RecordKind>,

        /// Only results on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only results on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Restrict to one session (id or prefix).
        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// List sessions, most recently active first.
    Sessions {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },

    /// The most recently active sessions.
    Recent {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: i64,

        #[arg(long)]
        json: bool,
    },

    /// List projects with session and message counts.
    Projects {
        #[arg(long)]
        json: bool,
    },

    /// Print one session.
    Show {
        /// Session id or unique prefix.
        id: String,

        /// Include tool calls and thinking.
        #[arg(long)]
        full: bool,

        #[arg(long)]
        json: bool,
    },

    /// Extract code blocks, written files, or tool calls from one session.
    Extract {
        /// Session id or unique prefix.
        id: String,

        /// Code blocks from assistant messages.
        #[arg(long)]
        code: bool,

        /// Only code blocks in this language (implies --code).
        #[arg(long, value_name = "LANG")]
        lang: Option<String>,

        /// Files written by Write/Edit tool calls.
        #[arg(long)]
        files: bool,

        /// Tool calls with this tool name.
        #[arg(long, value_name = "NAME")]
        tools: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Remove every indexed session. Saved analyses are kept.
    Clear {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Answer a question by analyzing relevant sessions.
    ///
    /// Requires the API key named by `analysis.api_key_env`.
    Analyze {
        question: String,

        /// Project pattern; repeat to compare projects.
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Analyze these sessions (id or prefix) instead of searching.
        #[arg(long = "session")]
        sessions: Vec<String>,

        /// Do not save the result.
        #[arg(long)]
        no_save: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage saved analyses.
    Analyses {
        #[command(subcommand)]
        action: AnalysesAction,
    },
}

#[derive(Subcommand)]
enum AnalysesAction {
    /// List saved analyses, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,

        #[arg(long)]
        json: bool,
    },
    /// Print one saved analysis (id or prefix).
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },
    /// Delete one saved analysis (id or prefix).
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "convo_harness=warn,convo=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress_mode = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
            pool.close().await;
        }
        Commands::Sync {
            force,
            dry_run,
            no_prune,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let options = SyncOptions {
                force,
                dry_run,
                prune: !no_prune,
            };
            let reporter = progress_mode.reporter();
            let report = indexer::sync(&pool, &cfg, &options, reporter.as_ref()).await?;

            let verb = if report.dry_run { "would index" } else { "indexed" };
            println!(
                "sync: {} discovered, {} {}, {} unchanged, {} pruned, {} malformed line(s)",
                report.discovered, verb, report.indexed, report.skipped, report.pruned, report.parse_errors
            );
            for failure in &report.failures {
                eprintln!("  failed {}: {}", failure.session_id, failure.error);
            }
            pool.close().await;
            if !report.failures.is_empty() {
                anyhow::bail!("{} session(s) failed to index", report.failures.len());
            }
        }
        Commands::Search {
            query,
            project,
            role,
            kind,
            since,
            until,
            session,
            limit,
            json,
        } => {
            let pool = open_index(&cfg).await?;
            let filter = SearchFilter {
                project: project.as_deref().map(ProjectPattern::compile).transpose()?,
                role,
                kind,
                since: since.as_deref().map(|s| search::parse_date_bound(s, false)).transpose()?,
                until: until.as_deref().map(|s| search::parse_date_bound(s, true)).transpose()?,
                session,
                limit,
            };
            let results = search::search(&pool, &cfg.search, &query, &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    println!(
                        "{}. {} / {}  [{} {}]  {}",
                        i + 1,
                        r.project,
                        short(&r.session_id),
                        r.role,
                        r.kind,
                        fmt_ts(r.timestamp)
                    );
                    println!("    line: {}", r.line_number);
                    println!("    excerpt: \"{}\"", r.snippet.replace('\n', " ").trim());
                    println!();
                }
            }
            pool.close().await;
        }
        Commands::Sessions {
            project,
            since,
            until,
            limit,
            json,
        } => {
            let pool = open_index(&cfg).await?;
            let filter = SearchFilter {
                project: project.as_deref().map(ProjectPattern::compile).transpose()?,
                since: since.as_deref().map(|s| search::parse_date_bound(s, false)).transpose()?,
                until: until.as_deref().map(|s| search::parse_date_bound(s, true)).transpose()?,
                limit: Some(limit),
                ..SearchFilter::default()
            };
            let sessions = search::list_sessions(&pool, &filter).await?;
            print_sessions(&sessions, json)?;
            pool.close().await;
        }
        Commands::Recent { count, json } => {
            let pool = open_index(&cfg).await?;
            let sessions = search::recent_sessions(&pool, count).await?;
            print_sessions(&sessions, json)?;
            pool.close().await;
        }
        Commands::Projects { json } => {
            let pool = open_index(&cfg).await?;
            let projects = search::list_projects(&pool).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects indexed.");
            } else {
                println!(
                    "{:<40} {:>8} {:>9}   {}",
                    "PROJECT", "SESSIONS", "MESSAGES", "LAST ACTIVE"
                );
                for p in &projects {
                    println!(
                        "{:<40} {:>8} {:>9}   {}",
                        p.name,
                        p.session_count,
                        p.message_count,
                        fmt_ts(p.last_active_at)
                    );
                }
            }
            pool.close().await;
        }
        Commands::Show { id, full, json } => {
            let pool = open_index(&cfg).await?;
            let detail = get::load_session(&pool, &cfg.search, &id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                let info = &detail.info;
                println!("Session: {}", info.session_id);
                println!("Project: {}", info.project);
                if let Some(slug) = &info.slug {
                    println!("Slug:    {}", slug);
                }
                println!(
                    "Active:  {} .. {}",
                    fmt_ts(info.started_at),
                    fmt_ts(info.last_active_at)
                );
                println!("File:    {}", info.file_path);
                if !detail.parse_errors.is_empty() {
                    println!("Skipped: {} malformed line(s)", detail.parse_errors.len());
                }
                for message in &detail.session.messages {
                    println!();
                    println!(
                        "--- [{}] line {}  {}",
                        message.role,
                        message.line_number,
                        fmt_ts(message.timestamp)
                    );
                    if full {
                        if let Some(thinking) = &message.thinking {
                            println!("(thinking) {}", thinking);
                        }
                    }
                    for block in &message.blocks {
                        match block {
                            ContentBlock::Text { text } => println!("{}", text),
                            ContentBlock::ToolUse { name, input, .. } if full => {
                                println!("(tool) {} {}", name, input);
                            }
                            ContentBlock::ToolUse { name, .. } => println!("(tool) {}", name),
                            ContentBlock::ToolResult {
                                content, is_error, ..
                            } if full => {
                                let tag = if *is_error { "tool error" } else { "tool result" };
                                println!("({}) {}", tag, content);
                            }
                            ContentBlock::ToolResult { .. } | ContentBlock::Code(_) => {}
                        }
                    }
                }
            }
            pool.close().await;
        }
        Commands::Extract {
            id,
            code,
            lang,
            files,
            tools,
            json,
        } => {
            if !code && lang.is_none() && !files && tools.is_none() {
                anyhow::bail!("specify what to extract: --code, --files, or --tools NAME");
            }
            let pool = open_index(&cfg).await?;
            let detail = get::load_session(&pool, &cfg.search, &id).await?;
            let session = &detail.session;

            if code || lang.is_some() {
                let blocks = extract::code_blocks(session, lang.as_deref());
                if json {
                    println!("{}", serde_json::to_string_pretty(&blocks)?);
                } else if blocks.is_empty() {
                    println!("No code blocks found.");
                } else {
                    for (i, block) in blocks.iter().enumerate() {
                        println!(
                            "--- Code block {} ({}, line {})",
                            i + 1,
                            block.language.as_deref().unwrap_or("text"),
                            block.message_line
                        );
                        println!("{}", block.body);
                        println!();
                    }
                    println!("{} code block(s)", blocks.len());
                }
            } else if files {
                let written = extract::written_files(session);
                if json {
                    println!("{}", serde_json::to_string_pretty(&written)?);
                } else if written.is_empty() {
                    println!("No files written in this session.");
                } else {
                    for f in &written {
                        println!("{:<6} {}  {}", f.tool, fmt_ts(f.timestamp), f.path);
                    }
                    println!("{} file(s)", written.len());
                }
            } else {
                let calls = extract::tool_calls(session, tools.as_deref());
                if json {
                    println!("{}", serde_json::to_string_pretty(&calls)?);
                } else if calls.is_empty() {
                    println!("No matching tool calls found.");
                } else {
                    for (i, call) in calls.iter().enumerate() {
                        println!(
                            "{}. {}  line {}  {}",
                            i + 1,
                            call.invocation.name,
                            call.invocation.line_number,
                            fmt_ts(call.timestamp)
                        );
                        let input = serde_json::to_string_pretty(&call.invocation.input)?;
                        println!("{}", truncate_chars(&input, 1000));
                    }
                    println!("{} tool call(s)", calls.len());
                }
            }
            pool.close().await;
        }
        Commands::Stats { json } => {
            let pool = open_index(&cfg).await?;
            let s = stats::index_stats(&pool, &cfg.db.path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&s)?);
            } else {
                stats::print_stats(&s);
            }
            pool.close().await;
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear the index without --yes");
            }
            let pool = open_index(&cfg).await?;
            indexer::clear_index(&pool).await?;
            println!("Index cleared.");
            pool.close().await;
        }
        Commands::Analyze {
            question,
            projects,
            sessions,
            no_save,
            json,
        } => {
            let pool = open_index(&cfg).await?;
            let service = AnthropicService::from_config(&cfg.analysis)
                .context("reasoning service is not configured")?;
            let reporter = progress_mode.reporter();
            let analyzer = Analyzer::new(&pool, &cfg, Arc::new(service), reporter.as_ref());
            let scope = AnalysisScope { projects, sessions };

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let result = match analyzer.analyze(&question, &scope, &cancel).await {
                Ok(result) => result,
                Err(Error::Cancelled { completed }) => {
                    eprintln!("Cancelled. {} task(s) had completed:", completed.len());
                    for finding in &completed {
                        if let FindingStatus::Success { text } = &finding.status {
                            println!("\n## Session {}\n\n{}", short(&finding.session_id), text);
                        }
                    }
                    pool.close().await;
                    anyhow::bail!("analysis cancelled");
                }
                Err(e) => return Err(e.into()),
            };

            if !no_save {
                persistence::save_analysis(&pool, &result).await?;
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_analysis(&result);
                if !no_save {
                    println!("\nSaved as {}", result.id);
                }
            }
            pool.close().await;
        }
        Commands::Analyses { action } => {
            let pool = open_index(&cfg).await?;
            match action {
                AnalysesAction::List { limit, json } => {
                    let list = persistence::list_analyses(&pool, limit).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    } else if list.is_empty() {
                        println!("No saved analyses.");
                    } else {
                        for a in &list {
                            println!(
                                "{}  {}  {} ok / {} failed  {}",
                                short(&a.id),
                                fmt_ts(a.created_at),
                                a.succeeded,
                                a.failed,
                                a.query
                            );
                            if !a.projects.is_empty() {
                                println!("          projects: {}", a.projects.join(", "));
                            }
                        }
                    }
                }
                AnalysesAction::Show { id, json } => {
                    let result = persistence::load_analysis(&pool, &id).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&result)?);
                    } else {
                        print_analysis(&result);
                    }
                }
                AnalysesAction::Delete { id } => {
                    let full = persistence::delete_analysis(&pool, &id).await?;
                    println!("Deleted {}", full);
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}

/// Open the existing index and bring its schema up to date.
async fn open_index(cfg: &Config) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = db::connect_existing(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

fn print_sessions(sessions: &[SessionInfo], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for s in sessions {
        println!(
            "{}  {:<28} {:>5} msgs  {}",
            short(&s.session_id),
            s.project,
            s.message_count,
            fmt_ts(s.last_active_at)
        );
        if let Some(first) = &s.first_message {
            println!("          {}", first);
        }
    }
    Ok(())
}

fn print_analysis(result: &AnalysisResult) {
    println!("Query:    {}", result.query);
    println!("Created:  {}", fmt_ts(Some(result.created_at)));
    println!(
        "Tasks:    {} succeeded, {} failed over {} session(s)",
        result.succeeded(),
        result.failed(),
        result.sessions.len()
    );
    println!();
    println!("{}", result.summary);

    if result.session_findings.len() > 1 {
        println!();
        println!("Per-session findings");
        println!("====================");
        for s in &result.session_findings {
            println!("\n## {} ({})\n", short(&s.session_id), s.project);
            println!("{}", s.text);
        }
    }

    let failures: Vec<_> = result
        .findings
        .iter()
        .filter_map(|f| match &f.status {
            FindingStatus::Failed { reason, .. } => Some((f, reason)),
            FindingStatus::Success { .. } => None,
        })
        .collect();
    if !failures.is_empty() {
        println!();
        println!("Failed tasks:");
        for (f, reason) in failures {
            println!(
                "  {} part {}/{}: {}",
                short(&f.session_id),
                f.chunk_index + 1,
                f.chunk_count,
                reason
            );
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n...", &text[..cut]),
        None => text.to_string(),
    }
}

fn short(id: &str) -> String {
    id.chars().take(8).collect()
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
