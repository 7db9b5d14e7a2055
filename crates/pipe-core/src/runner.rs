//! Drives one assistant CLI invocation from spawn to final comment.

use crate::comment::{CommentTarget, CommentUpdater};
use crate::config::PipeConfig;
use crate::context::{InlineAnchor, TriggerContext};
use crate::error::Result;
use crate::host::HostApi;
use crate::tools::MCP_SERVER_NAME;
use chrono::{DateTime, Utc};
use claude_agent::{
    build_mcp_config_json, ClaudeProcess, ContentBlock, EventReader, McpServerConfig, Message,
    QueryOptions, StreamItem,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncRead;

/// Time a terminated process gets before it is killed outright.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

const MCP_CONFIG_FILE: &str = "mcp.json";

/// Parent-environment variables the assistant must not inherit. The resolved
/// credential is added back explicitly; host credentials reach only the MCP
/// server.
const WITHHELD_ENV: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
    "CLAUDE_CODE_USE_BEDROCK",
    "CLAUDE_CODE_USE_VERTEX",
    "ANTHROPIC_VERTEX_PROJECT_ID",
    "CLOUD_ML_REGION",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "BITBUCKET_ACCESS_TOKEN",
    "BITBUCKET_USERNAME",
    "BITBUCKET_APP_PASSWORD",
];

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// `None` until the matching tool result arrives.
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tool_uses: Vec<ToolUse>,
}

impl ConversationTurn {
    fn assistant(content: String) -> Self {
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            tool_uses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: RunStatus,
    pub turns: Vec<ConversationTurn>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Final response text: the last assistant turn without tool uses.
    pub fn response_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && t.tool_uses.is_empty())
            .map(|t| t.content.as_str())
    }

    pub fn tool_use_count(&self) -> usize {
        self.turns.iter().map(|t| t.tool_uses.len()).sum()
    }

    fn failed(error: String, elapsed: Duration) -> Self {
        Self {
            status: RunStatus::Error,
            turns: Vec::new(),
            elapsed,
            error: Some(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Request and options
// ---------------------------------------------------------------------------

/// What to run and where output goes.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    pub pr_id: Option<u64>,
    pub tracking_comment_id: Option<u64>,
    pub inline: Option<InlineAnchor>,
    pub parent_comment_id: Option<u64>,
    pub allowed_tools: Vec<String>,
    pub blocked_tools: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Overrides `PipeConfig::timeout`.
    pub timeout: Option<Duration>,
    /// Parent directory for the scratch directory; system temp when unset.
    pub scratch_root: Option<PathBuf>,
    /// Executable that serves `mcp`; the current executable when unset.
    pub mcp_command: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Status settlement
// ---------------------------------------------------------------------------

/// First writer wins: once a status is settled later writers are ignored.
#[derive(Debug, Default)]
struct Settlement {
    settled: Option<(RunStatus, Option<String>)>,
}

impl Settlement {
    fn settle(&mut self, status: RunStatus, error: Option<String>) -> bool {
        if self.settled.is_some() {
            tracing::debug!(ignored = %status, "status already settled");
            return false;
        }
        self.settled = Some((status, error));
        true
    }

    fn settle_exit(&mut self, exit: &ExitStatus, stderr: String) -> bool {
        if exit.success() {
            return self.settle(RunStatus::Success, None);
        }
        let error = if stderr.is_empty() {
            match exit.code() {
                Some(code) => format!("Claude CLI exited with code {code}"),
                None => "Claude CLI was terminated by a signal".to_string(),
            }
        } else {
            stderr
        };
        self.settle(RunStatus::Error, Some(error))
    }

    fn into_parts(self) -> (RunStatus, Option<String>) {
        self.settled
            .unwrap_or((RunStatus::Error, Some("run ended without a status".into())))
    }
}

// ---------------------------------------------------------------------------
// Stream accumulation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Transcript {
    text: String,
    result_text: Option<String>,
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    /// Apply one event. Returns true when the response text grew.
    fn apply(&mut self, message: Message) -> bool {
        match message {
            Message::Assistant(msg) => {
                let mut grew = false;
                for block in msg.message.content {
                    match block {
                        ContentBlock::Text { text } if !text.is_empty() => {
                            if !self.text.is_empty() && !self.text.ends_with('\n') {
                                self.text.push_str("\n\n");
                            }
                            self.text.push_str(&text);
                            grew = true;
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            tracing::info!(tool = %name, "tool use");
                            self.turns.push(ConversationTurn {
                                role: Role::Assistant,
                                content: String::new(),
                                timestamp: Utc::now(),
                                tool_uses: vec![ToolUse {
                                    id,
                                    name,
                                    input,
                                    output: None,
                                }],
                            });
                        }
                        _ => {}
                    }
                }
                grew
            }
            Message::User(msg) => {
                self.attach_tool_results(&msg.message);
                false
            }
            Message::Result(result) => {
                tracing::info!(
                    subtype = %result.subtype,
                    turns = result.num_turns,
                    cost_usd = result.total_cost_usd,
                    "assistant finished"
                );
                self.result_text = result.result_text().map(String::from);
                false
            }
            Message::System(system) => {
                tracing::debug!(subtype = %system.subtype, model = ?system.model, "session event");
                false
            }
            Message::Unknown => false,
        }
    }

    fn attach_tool_results(&mut self, message: &serde_json::Value) {
        let Some(blocks) = message.get("content").and_then(|c| c.as_array()) else {
            return;
        };
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) != Some("tool_result") {
                continue;
            }
            let Some(id) = block.get("tool_use_id").and_then(|i| i.as_str()) else {
                continue;
            };
            let pending = self
                .turns
                .iter_mut()
                .rev()
                .flat_map(|t| t.tool_uses.iter_mut())
                .find(|u| u.id == id && u.output.is_none());
            if let Some(tool_use) = pending {
                tool_use.output = Some(block.get("content").cloned().unwrap_or_default());
            }
        }
    }

    /// Incremental text wins over the result event's copy.
    fn final_text(&self) -> String {
        if self.text.is_empty() {
            self.result_text.clone().unwrap_or_default()
        } else {
            self.text.clone()
        }
    }
}

async fn drive<R: AsyncRead + Unpin>(
    reader: &mut EventReader<R>,
    transcript: &mut Transcript,
    updater: &mut CommentUpdater<'_>,
    stream_partials: bool,
) -> Result<()> {
    while let Some(item) = reader.next_item().await? {
        match item {
            StreamItem::Event(message) => {
                if transcript.apply(message) && stream_partials {
                    updater.partial(&transcript.text).await;
                }
            }
            StreamItem::Noise(line) => {
                tracing::debug!(target: "claude_pipe::stdout", "{line}");
            }
        }
    }
    Ok(())
}

enum Race {
    Exited(Result<ExitStatus>),
    TimedOut,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner<'a> {
    config: &'a PipeConfig,
    host: &'a dyn HostApi,
    options: RunnerOptions,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a PipeConfig, host: &'a dyn HostApi, options: RunnerOptions) -> Self {
        Self {
            config,
            host,
            options,
        }
    }

    fn timeout(&self) -> Duration {
        self.options.timeout.unwrap_or_else(|| self.config.timeout())
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("claude-pipe-");
            b
        };
        match &self.options.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    /// Assistant environment: resolved credential plus scratch `TMPDIR`.
    fn child_env(&self, scratch: &Path) -> Vec<(String, String)> {
        let mut env = match &self.config.credentials {
            Some(creds) => {
                tracing::debug!(kind = creds.kind(), "using credentials");
                creds.env()
            }
            None => {
                tracing::warn!("no assistant credentials resolved; the CLI will likely refuse to run");
                Vec::new()
            }
        };
        env.push(("TMPDIR".into(), scratch.to_string_lossy().into_owned()));
        env
    }

    fn write_mcp_config(&self, scratch: &Path) -> Option<PathBuf> {
        if !self.config.enable_mcp_tools {
            return None;
        }
        let command = match &self.options.mcp_command {
            Some(path) => path.clone(),
            None => match std::env::current_exe() {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot locate own executable; MCP tools disabled");
                    return None;
                }
            },
        };
        let server = McpServerConfig {
            name: MCP_SERVER_NAME.to_string(),
            command: command.to_string_lossy().into_owned(),
            args: vec!["mcp".to_string()],
            env: self.config.host.to_env(),
        };
        let path = scratch.join(MCP_CONFIG_FILE);
        let written = build_mcp_config_json(&[server])
            .map_err(crate::PipeError::from)
            .and_then(|json| std::fs::write(&path, json).map_err(crate::PipeError::from));
        match written {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "could not write MCP config; MCP tools disabled");
                None
            }
        }
    }

    fn query_options(&self, request: &RunRequest, scratch: &Path) -> QueryOptions {
        QueryOptions {
            path_to_executable: Some(self.config.claude_cli.clone()),
            model: Some(self.config.model.clone()),
            fallback_model: self.config.fallback_model.clone(),
            max_turns: Some(self.config.max_turns),
            allowed_tools: request.allowed_tools.clone(),
            disallowed_tools: request.blocked_tools.clone(),
            mcp_config: self.write_mcp_config(scratch),
            cwd: Some(self.config.repo_path.clone()),
            env: self.child_env(scratch),
            env_remove: WITHHELD_ENV.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Run the assistant to completion, timeout or failure.
    ///
    /// Never fails: every outcome is an [`ExecutionResult`]. The scratch
    /// directory is gone when this returns.
    pub async fn run(&self, context: &TriggerContext, request: &RunRequest) -> ExecutionResult {
        let started = Instant::now();
        tracing::info!(
            event = %context.event_type,
            pr_id = ?request.pr_id,
            model = %self.config.model,
            "starting assistant"
        );

        let scratch = match self.scratch_dir() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionResult::failed(
                    format!("could not create scratch directory: {e}"),
                    started.elapsed(),
                )
            }
        };

        let result = self.run_in(scratch.path(), request, started).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!(path = %scratch_path.display(), error = %e, "could not remove scratch directory");
        }

        tracing::info!(
            status = %result.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            turns = result.turns.len(),
            "assistant run complete"
        );
        ExecutionResult {
            elapsed: started.elapsed(),
            ..result
        }
    }

    async fn run_in(&self, scratch: &Path, request: &RunRequest, started: Instant) -> ExecutionResult {
        let mut updater = CommentUpdater::new(
            self.host,
            CommentTarget {
                pr_id: request.pr_id,
                inline: request.inline.clone(),
                parent_comment_id: request.parent_comment_id.or(request.tracking_comment_id),
            },
        );

        let opts = self.query_options(request, scratch);
        let mut process = match ClaudeProcess::spawn(&request.prompt, &opts) {
            Ok(p) => p,
            Err(e) => {
                let error = e.to_string();
                tracing::error!(error = %error, "could not start assistant");
                if self.config.posts_final_update() {
                    updater.finish("", RunStatus::Error, Some(&error)).await;
                }
                return ExecutionResult::failed(error, started.elapsed());
            }
        };

        let stdout = match process.take_stdout() {
            Ok(s) => s,
            Err(e) => return ExecutionResult::failed(e.to_string(), started.elapsed()),
        };
        let mut reader = EventReader::new(stdout);
        let mut transcript = Transcript::default();
        let mut settlement = Settlement::default();
        let stream_partials = self.config.streams_partial_updates();
        let timeout = self.timeout();

        let race = tokio::select! {
            exited = async {
                drive(&mut reader, &mut transcript, &mut updater, stream_partials).await?;
                Ok::<_, crate::PipeError>(process.wait().await?)
            } => Race::Exited(exited),
            _ = tokio::time::sleep(timeout) => Race::TimedOut,
        };

        match race {
            Race::Exited(Ok(exit)) => {
                settlement.settle_exit(&exit, process.stderr());
            }
            Race::Exited(Err(e)) => {
                settlement.settle(RunStatus::Error, Some(e.to_string()));
                process.kill().await;
            }
            Race::TimedOut => {
                let minutes = timeout.as_secs_f64() / 60.0;
                settlement.settle(
                    RunStatus::Timeout,
                    Some(format!("execution timed out after {minutes:.1} minutes")),
                );
                tracing::warn!(timeout_secs = timeout.as_secs(), "assistant timed out; terminating");
                process.terminate().await;
                let exit = match tokio::time::timeout(TERMINATION_GRACE, process.wait()).await {
                    Ok(Ok(exit)) => Some(exit),
                    _ => {
                        process.kill().await;
                        process.wait().await.ok()
                    }
                };
                if let Some(exit) = exit {
                    settlement.settle_exit(&exit, process.stderr());
                }
            }
        }

        let (status, error) = settlement.into_parts();
        let text = transcript.final_text();
        let mut turns = transcript.turns;
        if !text.is_empty() {
            turns.push(ConversationTurn::assistant(text.clone()));
        }

        if self.config.posts_final_update() {
            updater.finish(&text, status, error.as_deref()).await;
        }

        ExecutionResult {
            status,
            turns,
            elapsed: started.elapsed(),
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
