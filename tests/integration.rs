use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn convo_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("convo");
    path
}

fn line(kind: &str, text: &str, ts: &str) -> String {
    serde_json::json!({
        "type": kind,
        "message": {"role": kind, "content": text},
        "timestamp": ts,
    })
    .to_string()
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Two sessions in one project, one in another
    let foo = root.join("transcripts").join("-Users-alice-Work-foo-bar");
    let ops = root.join("transcripts").join("-Users-alice-Work-ops");
    fs::create_dir_all(&foo).unwrap();
    fs::create_dir_all(&ops).unwrap();

    fs::write(
        foo.join("aaaa1111-0000-4000-8000-000000000001.jsonl"),
        [
            line("user", "How do I tune the connection pool?", "2024-05-01T10:00:00Z"),
            line("assistant", "Raise max_connections and set an idle timeout.", "2024-05-01T10:00:05Z"),
            line("user", "Great, thanks.", "2024-05-01T10:01:00Z"),
        ]
        .join("\n"),
    )
    .unwrap();
    fs::write(
        foo.join("bbbb2222-0000-4000-8000-000000000002.jsonl"),
        [
            line("user", "Why is the deploy failing?", "2024-05-02T09:00:00Z"),
            "{not valid json".to_string(),
            line("assistant", "The zanzibar flag was unset in the deploy script.", "2024-05-02T09:00:10Z"),
        ]
        .join("\n"),
    )
    .unwrap();
    fs::write(
        ops.join("cccc3333-0000-4000-8000-000000000003.jsonl"),
        [line("user", "Rollback procedure for the deploy?", "2024-05-03T08:00:00Z")].join("\n"),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/convo.sqlite"

[transcripts]
root = "{root}/transcripts"

[search]
min_prefix_len = 8

[analysis]
api_key_env = "CONVO_TEST_UNSET_KEY"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("convo.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_convo(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = convo_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("CONVO_TEST_UNSET_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run convo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn synced_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_convo(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_convo(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("convo.sqlite").exists());

    let (_, _, again) = run_convo(&config_path, &["init"]);
    assert!(again, "second init failed (not idempotent)");
}

#[test]
fn test_search_before_sync_reports_missing_index() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_convo(&config_path, &["search", "deploy"]);
    assert!(!success);
    assert!(stderr.contains("sync"), "expected a hint to sync, got: {}", stderr);
}

#[test]
fn test_sync_counts_and_idempotence() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_convo(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("3 discovered"), "got: {}", stdout);
    assert!(stdout.contains("indexed 3"), "got: {}", stdout);
    assert!(stdout.contains("1 malformed line(s)"), "got: {}", stdout);

    let (stdout, _, success) = run_convo(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("indexed 0"), "got: {}", stdout);
    assert!(stdout.contains("3 unchanged"), "got: {}", stdout);
}

#[test]
fn test_sync_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_convo(&config_path, &["sync", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("would index 3"), "got: {}", stdout);

    let (stdout, _, _) = run_convo(&config_path, &["sessions"]);
    assert!(stdout.contains("No sessions."), "got: {}", stdout);
}

#[test]
fn test_search_finds_message() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_convo(&config_path, &["search", "zanzibar"]);
    assert!(success);
    assert!(stdout.contains("foo-bar / bbbb2222"), "got: {}", stdout);
    assert!(stdout.contains("line: 3"), "got: {}", stdout);
    assert!(stdout.contains(">>>zanzibar<<<"), "got: {}", stdout);
}

#[test]
fn test_search_no_results_and_json() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_convo(&config_path, &["search", "kubernetes"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (stdout, _, success) =
        run_convo(&config_path, &["search", "deploy", "--project", "ops", "--json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let hits = parsed.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["project"], "ops");
}

#[test]
fn test_search_invalid_pattern_fails() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_convo(&config_path, &["search", "deploy", "--project", "re:("]);
    assert!(!success);
    assert!(stderr.contains("re:("), "got: {}", stderr);
}

#[test]
fn test_sessions_projects_and_recent() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_convo(&config_path, &["sessions", "--project", "foo-*"]);
    assert!(success);
    assert!(stdout.contains("aaaa1111"));
    assert!(stdout.contains("bbbb2222"));
    assert!(!stdout.contains("cccc3333"));

    let (stdout, _, success) = run_convo(&config_path, &["projects", "--json"]);
    assert!(success);
    let projects: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let names: Vec<&str> = projects
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["ops", "foo-bar"]);

    let (stdout, _, success) = run_convo(&config_path, &["recent", "-n", "1"]);
    assert!(success);
    assert!(stdout.contains("cccc3333"));
    assert!(!stdout.contains("aaaa1111"));
}

#[test]
fn test_show_by_prefix() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_convo(&config_path, &["show", "aaaa1111"]);
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("Session: aaaa1111-0000-4000-8000-000000000001"));
    assert!(stdout.contains("Project: foo-bar"));
    assert!(stdout.contains("connection pool"));

    let (_, stderr, success) = run_convo(&config_path, &["show", "aaaa"]);
    assert!(!success);
    assert!(stderr.contains("minimum of 8"), "got: {}", stderr);

    let (_, _, success) = run_convo(&config_path, &["show", "ffffffff"]);
    assert!(!success);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_convo(&config_path, &["stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(stats["sessions"], 3);
    assert_eq!(stats["message_records"], 6);
    assert_eq!(stats["skipped_lines"], 1);
    assert_eq!(stats["analyses"], 0);
}

#[test]
fn test_analyses_list_empty() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_convo(&config_path, &["analyses", "list"]);
    assert!(success);
    assert!(stdout.contains("No saved analyses."));
}

#[test]
fn test_analyze_without_credentials_fails() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_convo(&config_path, &["analyze", "why did deploys fail?"]);
    assert!(!success);
    assert!(stderr.contains("CONVO_TEST_UNSET_KEY"), "got: {}", stderr);
}

#[test]
fn test_clear_requires_confirmation() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_convo(&config_path, &["clear"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_convo(&config_path, &["clear", "--yes"]);
    assert!(success);
    assert!(stdout.contains("Index cleared."));

    let (stdout, _, _) = run_convo(&config_path, &["search", "zanzibar"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_extract_code_files_and_tools() {
    let (tmp, config_path) = setup_test_env();
    let assistant = serde_json::json!({
        "type": "assistant",
        "message": {"role": "assistant", "content": [
            {"type": "text", "text": "Here:\n```python\nprint('hi')\n```\n```sh\nls\n```"},
            {"type": "tool_use", "id": "t1", "name": "Write",
             "input": {"file_path": "/repo/hello.py", "content": "print('hi')"}},
            {"type": "tool_use", "id": "t2", "name": "Bash", "input": {"command": "python hello.py"}}
        ]},
        "timestamp": "2024-05-04T12:00:00Z",
    })
    .to_string();
    fs::write(
        tmp.path()
            .join("transcripts")
            .join("-Users-alice-Work-ops")
            .join("dddd4444-0000-4000-8000-000000000004.jsonl"),
        [line("user", "write hello", "2024-05-04T11:59:00Z"), assistant].join("\n"),
    )
    .unwrap();
    let (_, stderr, success) = run_convo(&config_path, &["sync"]);
    assert!(success, "sync failed: {}", stderr);

    let (stdout, stderr, success) =
        run_convo(&config_path, &["extract", "dddd4444", "--code", "--lang", "PYTHON"]);
    assert!(success, "extract failed: {}", stderr);
    assert!(stdout.contains("print('hi')"));
    assert!(!stdout.contains("ls\n"));
    assert!(stdout.contains("1 code block(s)"));

    let (stdout, _, success) = run_convo(&config_path, &["extract", "dddd4444", "--files"]);
    assert!(success);
    assert!(stdout.contains("/repo/hello.py"));
    assert!(stdout.contains("1 file(s)"));

    let (stdout, _, success) =
        run_convo(&config_path, &["extract", "dddd4444", "--tools", "Bash", "--json"]);
    assert!(success);
    let calls: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(calls.as_array().unwrap().len(), 1);
    assert_eq!(calls[0]["name"], "Bash");
    assert_eq!(calls[0]["input"]["command"], "python hello.py");

    let (_, stderr, success) = run_convo(&config_path, &["extract", "dddd4444"]);
    assert!(!success);
    assert!(stderr.contains("--code"));
}
