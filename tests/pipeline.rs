use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use convo_harness::analysis::{AnalysisScope, Analyzer, FindingStatus};
use convo_harness::config::Config;
use convo_harness::indexer::{self, SyncOptions, SyncReport};
use convo_harness::models::{RecordKind, Role};
use convo_harness::pattern::ProjectPattern;
use convo_harness::progress::NoProgress;
use convo_harness::reasoning::{CompletionRequest, ReasoningService, RetryPolicy, ServiceError};
use convo_harness::search::{self, SearchFilter};
use convo_harness::{db, get, migrate, persistence, Error};

// ============ Fixtures ============

fn user(text: &str, ts: &str) -> String {
    json!({
        "type": "user",
        "message": {"role": "user", "content": text},
        "timestamp": ts,
    })
    .to_string()
}

fn assistant(text: &str, ts: &str) -> String {
    json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [{"type": "text", "text": text}]},
        "timestamp": ts,
    })
    .to_string()
}

fn write_session(root: &Path, project_dir: &str, id: &str, lines: &[String]) -> PathBuf {
    let dir = root.join(project_dir);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.jsonl", id));
    fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

/// Rewrite a transcript and push its mtime forward so the fingerprint changes
/// even when the size does not.
fn rewrite(path: &Path, lines: &[String]) {
    fs::write(path, lines.join("\n") + "\n").unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();
}

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config: Config,
    pool: SqlitePool,
}

async fn setup() -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("projects");
    fs::create_dir_all(&root).unwrap();

    let mut config = Config::default();
    config.db.path = tmp.path().join("data").join("index.sqlite");
    config.transcripts.root = root.clone();
    config.analysis.max_concurrency = 3;

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    Env {
        _tmp: tmp,
        root,
        config,
        pool,
    }
}

async fn sync(env: &Env) -> SyncReport {
    indexer::sync(&env.pool, &env.config, &SyncOptions::default(), &NoProgress)
        .await
        .unwrap()
}

type RecordRow = (i64, String, String, String, String, i64, Option<i64>);

async fn records_of(pool: &SqlitePool, session_id: &str) -> Vec<RecordRow> {
    sqlx::query_as(
        "SELECT id, session_id, role, kind, content, line_number, timestamp FROM records WHERE session_id = ? ORDER BY id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

fn foo_bar_sessions(root: &Path) -> (PathBuf, PathBuf) {
    let s1 = write_session(
        root,
        "-Users-alice-Work-foo-bar",
        "11111111-aaaa-4000-8000-000000000001",
        &[
            user("How do I configure the connection pool?", "2024-05-01T10:00:00Z"),
            assistant("Set max_connections in the pool options.", "2024-05-01T10:00:05Z"),
            user("Thanks, that fixed the deploy.", "2024-05-01T10:01:00Z"),
        ],
    );
    let s2 = write_session(
        root,
        "-Users-alice-Work-foo-bar",
        "22222222-bbbb-4000-8000-000000000002",
        &[
            user("Why is the deploy failing?", "2024-05-02T09:00:00Z"),
            assistant("The deploy script is missing an env var.", "2024-05-02T09:00:10Z"),
            user("Found it: the zanzibar flag was unset.", "2024-05-02T09:02:00Z"),
        ],
    );
    (s1, s2)
}

const S1: &str = "11111111-aaaa-4000-8000-000000000001";
const S2: &str = "22222222-bbbb-4000-8000-000000000002";

// ============ Indexing and search ============

#[tokio::test]
async fn test_search_finds_unique_token_in_one_session() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    let report = sync(&env).await;
    assert_eq!(report.discovered, 2);
    assert_eq!(report.indexed, 2);
    assert!(report.failures.is_empty());

    let results = search::search(
        &env.pool,
        &env.config.search,
        "zanzibar",
        &SearchFilter::default(),
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].session_id, S2);
    assert_eq!(results[0].project, "foo-bar");
    assert_eq!(results[0].line_number, 3);
    assert!(results[0].snippet.contains(">>>zanzibar<<<"));
}

#[tokio::test]
async fn test_resync_without_changes_is_noop() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    sync(&env).await;
    let before = (records_of(&env.pool, S1).await, records_of(&env.pool, S2).await);

    let second = sync(&env).await;
    assert!(second.is_noop());
    assert_eq!(second.skipped, 2);

    let after = (records_of(&env.pool, S1).await, records_of(&env.pool, S2).await);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_changing_one_transcript_leaves_others_untouched() {
    let env = setup().await;
    let (_, s2_path) = foo_bar_sessions(&env.root);
    sync(&env).await;
    let s1_before = records_of(&env.pool, S1).await;

    // Same length, one character changed
    rewrite(
        &s2_path,
        &[
            user("Why is the deploy failing?", "2024-05-02T09:00:00Z"),
            assistant("The deploy script is missing an env var.", "2024-05-02T09:00:10Z"),
            user("Found it: the zanzibaR flag was unset.", "2024-05-02T09:02:00Z"),
        ],
    );

    let report = sync(&env).await;
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(records_of(&env.pool, S1).await, s1_before);

    let s2_records = records_of(&env.pool, S2).await;
    assert!(s2_records.iter().any(|r| r.4.contains("zanzibaR")));
}

#[tokio::test]
async fn test_failed_session_rolls_back_to_previous_state() {
    let env = setup().await;
    let (_, s2_path) = foo_bar_sessions(&env.root);
    sync(&env).await;
    let s1_before = records_of(&env.pool, S1).await;
    let s2_before = records_of(&env.pool, S2).await;

    sqlx::query(
        "CREATE TRIGGER fail_boom BEFORE INSERT ON records WHEN NEW.content = 'BOOM' \
         BEGIN SELECT RAISE(ABORT, 'boom'); END",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    rewrite(
        &s2_path,
        &[
            user("Why is the deploy failing?", "2024-05-02T09:00:00Z"),
            assistant("BOOM", "2024-05-02T09:00:10Z"),
        ],
    );

    let report = sync(&env).await;
    assert_eq!(report.indexed, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].session_id, S2);

    assert_eq!(records_of(&env.pool, S1).await, s1_before);
    assert_eq!(records_of(&env.pool, S2).await, s2_before);
    let still_found = search::search(
        &env.pool,
        &env.config.search,
        "zanzibar",
        &SearchFilter::default(),
    )
    .await
    .unwrap();
    assert_eq!(still_found.len(), 1);
}

#[tokio::test]
async fn test_deleted_transcript_is_pruned() {
    let env = setup().await;
    let (s1_path, _) = foo_bar_sessions(&env.root);
    sync(&env).await;

    fs::remove_file(&s1_path).unwrap();
    let report = sync(&env).await;
    assert_eq!(report.pruned, 1);
    assert!(records_of(&env.pool, S1).await.is_empty());

    let sessions = search::list_sessions(&env.pool, &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, S2);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = indexer::sync(&env.pool, &env.config, &options, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.indexed, 2);
    assert!(records_of(&env.pool, S1).await.is_empty());
}

#[tokio::test]
async fn test_session_prefix_resolution() {
    let env = setup().await;
    for id in ["abcdef12-0001", "abcdef12-0002", "99990000-x"] {
        write_session(
            &env.root,
            "-home-bob-proj",
            id,
            &[user("hello there", "2024-01-01T00:00:00Z")],
        );
    }
    sync(&env).await;
    let min = env.config.search.min_prefix_len;

    assert_eq!(
        search::resolve_session_id(&env.pool, "abcdef12-0001", min)
            .await
            .unwrap(),
        "abcdef12-0001"
    );
    assert_eq!(
        search::resolve_session_id(&env.pool, "99990000", min)
            .await
            .unwrap(),
        "99990000-x"
    );

    match search::resolve_session_id(&env.pool, "abcdef12", min).await {
        Err(Error::AmbiguousId { candidates, .. }) => {
            assert_eq!(candidates, vec!["abcdef12-0001", "abcdef12-0002"]);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert!(matches!(
        search::resolve_session_id(&env.pool, "ffffffff", min).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        search::resolve_session_id(&env.pool, "9999000", min).await,
        Err(Error::PrefixTooShort { min: 8, .. })
    ));
}

#[tokio::test]
async fn test_project_patterns_and_filters() {
    let env = setup().await;
    write_session(
        &env.root,
        "-Users-alice-Work-foo-bar",
        "s-foo-bar",
        &[
            user("tune the retry budget", "2024-03-01T00:00:00Z"),
            assistant(
                "Use this:\n```rust\nlet retry = Retry::budget(3);\n```",
                "2024-03-01T00:00:01Z",
            ),
        ],
    );
    write_session(
        &env.root,
        "-Users-alice-Work-foo-baz",
        "s-foo-baz",
        &[user("retry storms again", "2024-03-05T00:00:00Z")],
    );
    write_session(
        &env.root,
        "-Users-alice-Play-qux",
        "s-qux",
        &[user("retry logic for qux", "2024-03-09T00:00:00Z")],
    );
    sync(&env).await;

    let by = |pattern: &str| SearchFilter {
        project: Some(ProjectPattern::compile(pattern).unwrap()),
        ..SearchFilter::default()
    };
    let sessions_for = |results: Vec<convo_harness::models::SearchResult>| {
        let mut ids: Vec<String> = results.into_iter().map(|r| r.session_id).collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let glob = search::search(&env.pool, &env.config.search, "retry", &by("foo-*"))
        .await
        .unwrap();
    assert_eq!(sessions_for(glob), vec!["s-foo-bar", "s-foo-baz"]);

    let regex = search::search(&env.pool, &env.config.search, "retry", &by("re:^qux$"))
        .await
        .unwrap();
    assert_eq!(sessions_for(regex), vec!["s-qux"]);

    let substring = search::search(&env.pool, &env.config.search, "retry", &by("BAZ"))
        .await
        .unwrap();
    assert_eq!(sessions_for(substring), vec!["s-foo-baz"]);

    let no_match = search::search(&env.pool, &env.config.search, "retry", &by("re:^nothing$"))
        .await
        .unwrap();
    assert!(no_match.is_empty());

    let code = search::search(
        &env.pool,
        &env.config.search,
        "budget",
        &SearchFilter {
            kind: Some(RecordKind::Code),
            ..SearchFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(code.len(), 1);
    assert_eq!(code[0].kind, "code");
    assert_eq!(code[0].role, "assistant");

    let users_since = search::search(
        &env.pool,
        &env.config.search,
        "retry",
        &SearchFilter {
            role: Some(Role::User),
            since: Some(search::parse_date_bound("2024-03-04", false).unwrap()),
            ..SearchFilter::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(sessions_for(users_since), vec!["s-foo-baz", "s-qux"]);

    let projects = search::list_projects(&env.pool).await.unwrap();
    let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["qux", "foo-baz", "foo-bar"]);
    assert_eq!(projects[2].message_count, 2);

    let recent = search::recent_sessions(&env.pool, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].session_id, "s-qux");
}

#[tokio::test]
async fn test_query_sanitizing_and_empty_query() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    sync(&env).await;

    let empty = search::search(&env.pool, &env.config.search, " ?^~ ", &SearchFilter::default())
        .await
        .unwrap();
    assert!(empty.is_empty());

    let sanitized = search::search(
        &env.pool,
        &env.config.search,
        "zanzibar?",
        &SearchFilter::default(),
    )
    .await
    .unwrap();
    assert_eq!(sanitized.len(), 1);
}

#[tokio::test]
async fn test_search_with_punctuated_terms() {
    let env = setup().await;
    write_session(
        &env.root,
        "-Users-alice-Work-foo-bar",
        "s-punct",
        &[
            user("The foo-bar service crashed.", "2024-06-01T10:00:00Z"),
            assistant(
                "It threw TypeError: undefined is not a function in src/app.js.",
                "2024-06-01T10:00:05Z",
            ),
        ],
    );
    sync(&env).await;

    let search_for = |query: &'static str| {
        let pool = env.pool.clone();
        let config = env.config.search.clone();
        async move { search::search(&pool, &config, query, &SearchFilter::default()).await }
    };

    let hyphenated = search_for("foo-bar").await.unwrap();
    assert_eq!(hyphenated.len(), 1);
    assert_eq!(hyphenated[0].line_number, 1);

    let colon = search_for("TypeError: undefined").await.unwrap();
    assert_eq!(colon.len(), 1);
    assert_eq!(colon[0].line_number, 2);

    assert_eq!(search_for("src/app.js").await.unwrap().len(), 1);
    assert_eq!(search_for("it's crash*").await.unwrap().len(), 0);
    assert_eq!(search_for("crash*").await.unwrap().len(), 1);
    assert!(search_for("Error: -").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_load_session_reparses_and_reports_missing_file() {
    let env = setup().await;
    let (s1_path, _) = foo_bar_sessions(&env.root);
    sync(&env).await;

    let detail = get::load_session(&env.pool, &env.config.search, "11111111")
        .await
        .unwrap();
    assert_eq!(detail.session.id, S1);
    assert_eq!(detail.session.messages.len(), 3);
    assert_eq!(detail.info.project, "foo-bar");

    fs::remove_file(&s1_path).unwrap();
    assert!(matches!(
        get::load_session(&env.pool, &env.config.search, S1).await,
        Err(Error::NotFound { .. })
    ));
}

// ============ Analysis ============

/// Replies by prompt shape: decomposition, specialist, or synthesis.
struct ScriptedService {
    decomposition: Result<String, ServiceError>,
    /// Specialist calls whose excerpt mentions this session fail.
    fail_session: Option<String>,
    /// Specialist calls for every other session hang instead of answering.
    hang_others_than: Option<String>,
}

impl ScriptedService {
    fn new() -> Self {
        Self {
            decomposition: Ok(
                r#"{"search_queries": ["deploy"], "analysis_prompt": "What broke deploys?", "comparison_needed": true}"#
                    .to_string(),
            ),
            fail_session: None,
            hang_others_than: None,
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let prompt = &request.prompt;
        if prompt.starts_with("User question:") {
            return self.decomposition.clone();
        }
        if prompt.contains("Conversation excerpt") {
            if let Some(keep) = &self.hang_others_than {
                if !prompt.contains(keep.as_str()) {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }
            if let Some(fail) = &self.fail_session {
                if prompt.contains(fail.as_str()) {
                    return Err(ServiceError::BadRequest {
                        status: 400,
                        body: "simulated failure".to_string(),
                    });
                }
            }
            let id = prompt
                .split("=== Session ")
                .nth(1)
                .and_then(|rest| rest.split(' ').next())
                .unwrap_or("?");
            return Ok(format!("finding for {}", id));
        }
        Ok("synthesized answer".to_string())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        timeout: Duration::from_secs(5),
    }
}

const S3: &str = "33333333-cccc-4000-8000-000000000003";

fn three_deploy_sessions(root: &Path) {
    foo_bar_sessions(root);
    write_session(
        root,
        "-Users-alice-Work-ops",
        S3,
        &[
            user("deploy rollback procedure?", "2024-05-03T08:00:00Z"),
            assistant("Run the rollback job, then redeploy.", "2024-05-03T08:00:05Z"),
        ],
    );
}

#[tokio::test]
async fn test_analysis_survives_one_failed_task() {
    let env = setup().await;
    three_deploy_sessions(&env.root);
    sync(&env).await;

    let mut service = ScriptedService::new();
    service.fail_session = Some(S3.to_string());
    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(service), &NoProgress)
        .with_retry_policy(fast_policy());

    let result = analyzer
        .analyze("Why did deploys fail?", &AnalysisScope::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.decomposed.search_queries, vec!["deploy"]);
    assert_eq!(result.sessions.len(), 3);
    assert_eq!(result.findings.len(), 3);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.failed(), 1);

    let failed = result.findings.iter().find(|f| !f.is_success()).unwrap();
    assert_eq!(failed.session_id, S3);
    match &failed.status {
        FindingStatus::Failed { reason, transient } => {
            assert!(reason.contains("simulated failure"));
            assert!(!transient);
        }
        other => panic!("unexpected status {:?}", other),
    }

    assert_eq!(result.session_findings.len(), 2);
    assert!(result
        .session_findings
        .iter()
        .any(|s| s.text == format!("finding for {}", S1)));
    assert_eq!(result.summary, "synthesized answer");
    assert!(!result.log.is_empty());
}

#[tokio::test]
async fn test_analysis_with_zero_successes_is_a_failure() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    sync(&env).await;

    struct AlwaysRejects;
    #[async_trait]
    impl ReasoningService for AlwaysRejects {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
            if request.prompt.starts_with("User question:") {
                return Ok("not json".to_string());
            }
            Err(ServiceError::MalformedResponse("nope".to_string()))
        }
    }

    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(AlwaysRejects), &NoProgress)
        .with_retry_policy(fast_policy());
    let scope = AnalysisScope {
        sessions: vec![S1.to_string(), S2.to_string()],
        ..AnalysisScope::default()
    };

    match analyzer.analyze("deploy", &scope, &CancellationToken::new()).await {
        Err(Error::AnalysisFailure { reasons }) => assert_eq!(reasons.len(), 2),
        other => panic!("expected AnalysisFailure, got {:?}", other.map(|r| r.summary)),
    }
}

#[tokio::test]
async fn test_single_success_becomes_summary_and_decompose_falls_back() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    sync(&env).await;

    let mut service = ScriptedService::new();
    service.decomposition = Err(ServiceError::BadRequest {
        status: 400,
        body: "no".to_string(),
    });
    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(service), &NoProgress)
        .with_retry_policy(fast_policy());

    let result = analyzer
        .analyze("zanzibar", &AnalysisScope::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.decomposed.search_queries, vec!["zanzibar"]);
    assert_eq!(result.sessions, vec![S2.to_string()]);
    assert_eq!(result.summary, format!("finding for {}", S2));
}

#[tokio::test]
async fn test_analysis_with_punctuated_search_queries() {
    let env = setup().await;
    three_deploy_sessions(&env.root);
    sync(&env).await;

    let mut service = ScriptedService::new();
    service.decomposition =
        Ok(r#"{"search_queries": ["Error: deploy", "deploy-script", "deploy"]}"#.to_string());
    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(service), &NoProgress)
        .with_retry_policy(fast_policy());

    let result = analyzer
        .analyze("deploy errors?", &AnalysisScope::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.sessions.len(), 3);
    assert_eq!(result.succeeded(), 3);
}

#[tokio::test]
async fn test_analysis_with_no_matching_sessions() {
    let env = setup().await;
    foo_bar_sessions(&env.root);
    sync(&env).await;

    let mut service = ScriptedService::new();
    service.decomposition = Ok(r#"{"search_queries": ["kubernetes"]}"#.to_string());
    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(service), &NoProgress)
        .with_retry_policy(fast_policy());

    let result = analyzer
        .analyze("k8s?", &AnalysisScope::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.sessions.is_empty());
    assert!(result.findings.is_empty());
}

#[tokio::test]
async fn test_cancellation_keeps_completed_findings() {
    let env = setup().await;
    three_deploy_sessions(&env.root);
    sync(&env).await;

    let mut service = ScriptedService::new();
    service.hang_others_than = Some(S1.to_string());
    let analyzer = Analyzer::new(&env.pool, &env.config, Arc::new(service), &NoProgress)
        .with_retry_policy(fast_policy());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = analyzer
        .analyze("deploy", &AnalysisScope::default(), &cancel)
        .await;
    assert!(started.elapsed() < Duration::from_secs(10));

    match outcome {
        Err(Error::Cancelled { completed }) => {
            assert_eq!(completed.len(), 1);
            assert_eq!(completed[0].session_id, S1);
            assert!(completed[0].is_success());
        }
        other => panic!("expected Cancelled, got {:?}", other.map(|r| r.summary)),
    }
}

// ============ Persistence ============

#[tokio::test]
async fn test_saved_analysis_upsert_prefix_and_delete() {
    let env = setup().await;
    three_deploy_sessions(&env.root);
    sync(&env).await;

    let analyzer = Analyzer::new(
        &env.pool,
        &env.config,
        Arc::new(ScriptedService::new()),
        &NoProgress,
    )
    .with_retry_policy(fast_policy());
    let mut result = analyzer
        .analyze("deploy history", &AnalysisScope::default(), &CancellationToken::new())
        .await
        .unwrap();

    persistence::save_analysis(&env.pool, &result).await.unwrap();
    result.summary = "revised".to_string();
    persistence::save_analysis(&env.pool, &result).await.unwrap();

    let listed = persistence::list_analyses(&env.pool, 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].query, "deploy history");
    assert_eq!(listed[0].succeeded, 3);
    assert_eq!(listed[0].sessions.len(), 3);

    let loaded = persistence::load_analysis(&env.pool, &result.id[..6])
        .await
        .unwrap();
    assert_eq!(loaded.summary, "revised");
    assert_eq!(loaded.findings.len(), 3);
    assert_eq!(loaded.created_at, result.created_at);

    let deleted = persistence::delete_analysis(&env.pool, &result.id).await.unwrap();
    assert_eq!(deleted, result.id);
    assert!(matches!(
        persistence::load_analysis(&env.pool, &result.id).await,
        Err(Error::NotFound { .. })
    ));
}
