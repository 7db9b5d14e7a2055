use super::{load_config, Overrides};
use crate::output::{print_summary, write_json};
use anyhow::Context;
use pipe_core::comment::format_final;
use pipe_core::config::PipeConfig;
use pipe_core::context::EventType;
use pipe_core::host::{BitbucketClient, HostApi};
use pipe_core::prepare::{prepare, PreparedExecution};
use pipe_core::runner::{ExecutionResult, RunStatus, Runner, RunnerOptions};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero outcomes
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    CliNotFound(String),
    Failed(String),
    TimedOut(String),
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::CliNotFound(cli) => write!(
                f,
                "Claude CLI '{cli}' not found; install it in the pipe image or set CLAUDE_CLI_PATH"
            ),
            RunExit::Failed(reason) => write!(f, "Claude run failed: {reason}"),
            RunExit::TimedOut(reason) => write!(f, "Claude run timed out: {reason}"),
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// Machine-readable record of one pipe step.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    /// success, error, timeout or skipped
    pub status: String,
    pub mode: String,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_id: Option<u64>,
    pub elapsed_ms: u64,
    pub turns: usize,
    pub tool_uses: usize,
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_comment_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionSummary {
    fn new(prepared: &PreparedExecution, status: &str) -> Self {
        Self {
            status: status.to_string(),
            mode: prepared.mode.to_string(),
            event_type: prepared.context.event_type,
            pr_id: prepared.context.pull_request.as_ref().map(|pr| pr.id),
            elapsed_ms: 0,
            turns: 0,
            tool_uses: 0,
            tools_used: Vec::new(),
            request_kind: prepared.request_kind.map(|k| k.to_string()),
            tracking_comment_id: prepared.tracking_comment_id,
            error: None,
            finished_at: chrono::Utc::now(),
        }
    }

    fn with_result(mut self, result: &ExecutionResult) -> Self {
        let mut tools_used: Vec<String> = result
            .turns
            .iter()
            .flat_map(|t| t.tool_uses.iter().map(|u| u.name.clone()))
            .collect();
        tools_used.sort();
        tools_used.dedup();

        self.status = result.status.to_string();
        self.elapsed_ms = result.elapsed.as_millis() as u64;
        self.turns = result.turns.len();
        self.tool_uses = result.tool_use_count();
        self.tools_used = tools_used;
        self.error = result.error.clone();
        self
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(
    repo_path: Option<&Path>,
    overrides: &Overrides,
    summary_file: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(repo_path, overrides, true)?;

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            let error = anyhow::Error::new(e).context("failed to start async runtime");
            print_failure(&error);
            return Err(error);
        }
    };
    let client = match BitbucketClient::new(config.host.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            let error = anyhow::Error::new(e).context("failed to build Bitbucket client");
            print_failure(&error);
            return Err(error);
        }
    };

    let work = orchestrate(config.clone(), Arc::clone(&client));
    let summary = rt.block_on(guarded(&config, client.as_ref(), work))?;

    print_summary(&summary);
    if let Some(path) = summary_file {
        write_json(path, &summary)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }

    let reason = summary.error.clone().unwrap_or_default();
    match summary.status.as_str() {
        "error" => Err(RunExit::Failed(reason).into()),
        "timeout" => Err(RunExit::TimedOut(reason).into()),
        _ => Ok(()),
    }
}

/// Run `work` on its own task. An error or a panic becomes one error
/// comment on the pull request before it is returned.
async fn guarded<F>(
    config: &PipeConfig,
    host: &dyn HostApi,
    work: F,
) -> anyhow::Result<ExecutionSummary>
where
    F: Future<Output = anyhow::Result<ExecutionSummary>> + Send + 'static,
{
    let outcome = match tokio::spawn(work).await {
        Ok(result) => result,
        Err(join) => Err(aborted(join)),
    };
    if let Err(error) = &outcome {
        tracing::error!(error = %format!("{error:#}"), "pipe run failed");
        report_failure(config, host, error).await;
    }
    outcome
}

fn aborted(join: JoinError) -> anyhow::Error {
    if !join.is_panic() {
        return anyhow::anyhow!("pipe run was cancelled");
    }
    let payload = join.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("pipe run panicked: {message}")
}

async fn orchestrate(
    mut config: PipeConfig,
    host: Arc<BitbucketClient>,
) -> anyhow::Result<ExecutionSummary> {
    match which::which(&config.claude_cli) {
        Ok(resolved) => {
            tracing::debug!(cli = %resolved.display(), "resolved Claude CLI");
            config.claude_cli = resolved;
        }
        Err(e) => {
            let cli = config.claude_cli.display().to_string();
            tracing::error!(cli = %cli, error = %e, "Claude CLI not found");
            return Err(RunExit::CliNotFound(cli).into());
        }
    }
    Ok(execute(&config, host.as_ref()).await)
}

async fn execute(config: &PipeConfig, host: &dyn HostApi) -> ExecutionSummary {
    let prepared = prepare(config, host, false).await;
    if !prepared.should_execute {
        return ExecutionSummary::new(&prepared, "skipped");
    }

    let summary = ExecutionSummary::new(&prepared, RunStatus::Success.as_str());
    let context = prepared.context.clone();
    let request = prepared.into_run_request();

    let runner = Runner::new(config, host, RunnerOptions::default());
    let result = runner.run(&context, &request).await;
    summary.with_result(&result)
}

fn failure_body(error: &anyhow::Error) -> String {
    format_final("", RunStatus::Error, Some(&format!("{error:#}")))
}

/// Failures before a host client exists can only be shown in the log.
fn print_failure(error: &anyhow::Error) {
    println!("{}", failure_body(error));
}

/// Best effort: tell the pull request why the run ended. Printed instead
/// when there is no pull request or the comment cannot be posted.
async fn report_failure(config: &PipeConfig, host: &dyn HostApi, error: &anyhow::Error) {
    let body = failure_body(error);
    let posted = match config.pr_id {
        Some(pr_id) => host
            .create_pull_request_comment(pr_id, &body, None, None)
            .await
            .is_some(),
        None => false,
    };
    if !posted {
        println!("{body}");
    }
}
