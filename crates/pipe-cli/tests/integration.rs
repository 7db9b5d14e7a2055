#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A `claude-pipe` command with a clean environment rooted at `dir`.
fn pipe(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("claude-pipe").unwrap();
    cmd.env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("TMPDIR", dir.path())
        .current_dir(dir.path());
    cmd
}

/// Repository coordinates plus an API key, without a Bitbucket credential.
fn configured(dir: &TempDir) -> Command {
    let mut cmd = pipe(dir);
    cmd.env("BITBUCKET_WORKSPACE", "acme")
        .env("BITBUCKET_REPO_SLUG", "widgets")
        .env("BITBUCKET_CLONE_DIR", dir.path())
        .env("ANTHROPIC_API_KEY", "sk-test");
    cmd
}

fn fake_cli(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ---------------------------------------------------------------------------
// claude-pipe classify
// ---------------------------------------------------------------------------

#[test]
fn classify_imperative_request_as_actionable() {
    let dir = TempDir::new().unwrap();
    pipe(&dir)
        .args(["classify", "please fix the null check in the parser"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("actionable"));
}

#[test]
fn classify_json_reports_matches() {
    let dir = TempDir::new().unwrap();
    let output = pipe(&dir)
        .args(["classify", "--json", "what does this function do?"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["kind"], "informational");
    assert!(!json["informational_matches"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// claude-pipe run: configuration failures
// ---------------------------------------------------------------------------

#[test]
fn run_without_workspace_fails_fast() {
    let dir = TempDir::new().unwrap();
    pipe(&dir)
        .env("ANTHROPIC_API_KEY", "sk-test")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("BITBUCKET_WORKSPACE"));
}

#[test]
fn run_without_credentials_fails_fast() {
    let dir = TempDir::new().unwrap();
    pipe(&dir)
        .env("BITBUCKET_WORKSPACE", "acme")
        .env("BITBUCKET_REPO_SLUG", "widgets")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ANTHROPIC_API_KEY"));
}

#[test]
fn run_rejects_unknown_mode() {
    let dir = TempDir::new().unwrap();
    configured(&dir)
        .args(["run", "--mode", "chaos"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MODE"));
}

#[test]
fn run_with_missing_cli_fails() {
    let dir = TempDir::new().unwrap();
    configured(&dir)
        .env("CLAUDE_CLI_PATH", dir.path().join("no-such-claude"))
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CLAUDE_CLI_PATH"));
}

// ---------------------------------------------------------------------------
// claude-pipe run: assistant execution
// ---------------------------------------------------------------------------

#[test]
fn run_prints_final_comment_and_writes_summary() {
    let dir = TempDir::new().unwrap();
    let cli = fake_cli(
        dir.path(),
        r#"echo '{"type":"system","subtype":"init","session_id":"s1"}'
echo '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"README.md"}}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"The README is current."}]}}'
echo '{"type":"result","subtype":"success","result":"The README is current."}'"#,
    );
    let summary = dir.path().join("summary.json");

    configured(&dir)
        .env("CLAUDE_CLI_PATH", &cli)
        .env("ENABLE_MCP_TOOLS", "false")
        .args(["run", "--summary-file"])
        .arg(&summary)
        .assert()
        .success()
        .stdout(predicate::str::contains("✅"))
        .stdout(predicate::str::contains("The README is current."));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["mode"], "tag");
    assert_eq!(json["event_type"], "manual");
    assert_eq!(json["tool_uses"], 1);
    assert_eq!(json["tools_used"][0], "Read");
}

#[test]
fn run_exits_nonzero_when_assistant_fails() {
    let dir = TempDir::new().unwrap();
    let cli = fake_cli(dir.path(), "echo 'rate limit exceeded' >&2\nexit 1");

    configured(&dir)
        .env("CLAUDE_CLI_PATH", &cli)
        .env("ENABLE_MCP_TOOLS", "false")
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("❌"))
        .stderr(predicate::str::contains("rate limit exceeded"));
}

#[test]
fn agent_mode_without_task_still_runs() {
    let dir = TempDir::new().unwrap();
    let cli = fake_cli(
        dir.path(),
        r#"echo '{"type":"result","subtype":"success","result":"Nothing to do."}'"#,
    );

    configured(&dir)
        .env("CLAUDE_CLI_PATH", &cli)
        .env("ENABLE_MCP_TOOLS", "false")
        .env("MODE", "agent")
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to do."));
}

#[test]
fn review_mode_skips_manual_runs() {
    let dir = TempDir::new().unwrap();
    let cli = fake_cli(dir.path(), "echo 'should not run' >&2\nexit 1");
    let summary = dir.path().join("summary.json");

    configured(&dir)
        .env("CLAUDE_CLI_PATH", &cli)
        .args(["run", "--mode", "review", "--summary-file"])
        .arg(&summary)
        .assert()
        .success();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["status"], "skipped");
}

// ---------------------------------------------------------------------------
// claude-pipe prepare
// ---------------------------------------------------------------------------

#[test]
fn prepare_json_finds_comment_trigger_without_posting() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/repositories/acme/widgets/pullrequests/5")
        .with_body(
            r#"{"id":5,"title":"Retry uploads","description":"","state":"OPEN",
               "author":{"display_name":"Alice"},
               "source":{"branch":{"name":"retry"}},
               "destination":{"branch":{"name":"main"}}}"#,
        )
        .create();
    server
        .mock("GET", "/repositories/acme/widgets/pullrequests/5/comments")
        .match_query(mockito::Matcher::Any)
        .with_body(
            r#"{"values":[{"id":40,"content":{"raw":"@claude add a unit test for the backoff"},
                "user":{"display_name":"Bob"}}]}"#,
        )
        .create();
    let posts = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create();

    let output = pipe(&dir)
        .env("BITBUCKET_WORKSPACE", "acme")
        .env("BITBUCKET_REPO_SLUG", "widgets")
        .env("BITBUCKET_ACCESS_TOKEN", "tok")
        .env("BITBUCKET_API_URL", server.url())
        .env("BITBUCKET_PR_ID", "5")
        .args(["prepare", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["should_execute"], true);
    assert_eq!(json["trigger_source"], "comment");
    assert_eq!(json["trigger_comment_id"], 40);
    assert_eq!(json["request_kind"], "actionable");
    assert!(json["prompt"]
        .as_str()
        .unwrap()
        .contains("add a unit test for the backoff"));
    posts.assert();
}

// ---------------------------------------------------------------------------
// claude-pipe mcp
// ---------------------------------------------------------------------------

#[test]
fn mcp_answers_initialize_and_skips_notifications() {
    let dir = TempDir::new().unwrap();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        "\n",
        r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        "\n",
    );

    let output = pipe(&dir)
        .env("BITBUCKET_WORKSPACE", "acme")
        .env("BITBUCKET_REPO_SLUG", "widgets")
        .arg("mcp")
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[0]["result"]["serverInfo"]["name"], "claude-pipe-bitbucket");
    assert_eq!(lines[1]["result"]["tools"].as_array().unwrap().len(), 6);
}

#[test]
fn mcp_requires_repository_coordinates() {
    let dir = TempDir::new().unwrap();
    pipe(&dir)
        .arg("mcp")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("BITBUCKET_WORKSPACE"));
}
