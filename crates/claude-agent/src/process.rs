use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::types::{McpServerConfig, QueryOptions};
use crate::{ClaudeAgentError, Result};

const DEFAULT_EXECUTABLE: &str = "claude";

// ─── ClaudeProcess ────────────────────────────────────────────────────────

/// A running `claude --print --output-format stream-json` subprocess.
///
/// The prompt travels as the trailing positional argument, so stdin is
/// attached to `/dev/null` and never written. Stdout is handed to the caller
/// via [`ClaudeProcess::take_stdout`]; stderr is drained by a background task
/// and surfaced through [`ClaudeProcess::stderr`].
pub struct ClaudeProcess {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr_buf: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ClaudeProcess {
    /// Spawn the CLI with the given prompt and options.
    pub fn spawn(prompt: &str, opts: &QueryOptions) -> Result<Self> {
        let program = opts
            .path_to_executable
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string());

        let mut cmd = Command::new(&program);
        cmd.args(build_args(prompt, opts));

        // Running inside another Claude session confuses the CLI.
        cmd.env_remove("CLAUDECODE");
        for key in &opts.env_remove {
            cmd.env_remove(key);
        }
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!(program = %program, "spawning assistant CLI");
        Self::from_command(cmd).map_err(|e| match e {
            ClaudeAgentError::Io(source) => ClaudeAgentError::Spawn { program, source },
            other => other,
        })
    }

    /// Spawn an arbitrary command as a stand-in for the CLI.
    pub fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeAgentError::Process("stdout not captured".into()))?;

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(target: "claude_agent::stderr", "{line}");
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        Ok(Self {
            child,
            stdout: Some(stdout),
            stderr_buf,
            stderr_task,
        })
    }

    /// OS process id, if the child has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take ownership of stdout. Returns an error on the second call.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.stdout
            .take()
            .ok_or_else(|| ClaudeAgentError::Process("stdout already taken".into()))
    }

    /// Ask the process to stop with SIGTERM (`kill -TERM {pid}`).
    ///
    /// Falls back to a hard kill where SIGTERM is unavailable.
    pub async fn terminate(&mut self) {
        #[cfg(unix)]
        {
            let Some(pid) = self.child.id() else {
                return;
            };
            let sent = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if sent {
                return;
            }
            tracing::warn!(pid, "kill -TERM failed; killing instead");
        }
        let _ = self.child.start_kill();
    }

    /// Kill the subprocess (best-effort; errors are silently ignored).
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    /// Wait for the child to exit. Also waits for the stderr reader to drain
    /// so [`ClaudeProcess::stderr`] is complete afterwards.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        Ok(status)
    }

    /// Everything the process wrote to stderr so far, trimmed.
    pub fn stderr(&self) -> String {
        self.stderr_buf
            .lock()
            .map(|b| b.trim().to_string())
            .unwrap_or_default()
    }
}

// ─── Argument builder ─────────────────────────────────────────────────────

/// Build the CLI argument vector. The prompt is always the last element.
pub fn build_args(prompt: &str, opts: &QueryOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--print".into(),
        "--output-format".into(),
        "stream-json".into(),
        // stream-json output requires --verbose in print mode
        "--verbose".into(),
    ];

    if let Some(model) = &opts.model {
        args.push("--model".into());
        args.push(model.clone());
    }

    if let Some(fallback) = &opts.fallback_model {
        args.push("--fallback-model".into());
        args.push(fallback.clone());
    }

    if let Some(max_turns) = opts.max_turns {
        args.push("--max-turns".into());
        args.push(max_turns.to_string());
    }

    if !opts.allowed_tools.is_empty() {
        args.push("--allowed-tools".into());
        args.push(opts.allowed_tools.join(","));
    }

    if !opts.disallowed_tools.is_empty() {
        args.push("--disallowed-tools".into());
        args.push(opts.disallowed_tools.join(","));
    }

    if let Some(path) = &opts.mcp_config {
        args.push("--mcp-config".into());
        args.push(path.to_string_lossy().into_owned());
    }

    args.push(prompt.to_string());
    args
}

/// Serialise `McpServerConfig` entries into the JSON document expected by
/// `claude --mcp-config <file>`.
///
/// Format: `{"mcpServers":{"<name>":{"type":"stdio","command":"...","args":[...],"env":{...}}}}`
pub fn build_mcp_config_json(servers: &[McpServerConfig]) -> Result<String> {
    let mut mcp_servers = serde_json::Map::new();

    for srv in servers {
        let mut cfg = serde_json::Map::new();
        cfg.insert("type".into(), serde_json::Value::String("stdio".into()));
        cfg.insert(
            "command".into(),
            serde_json::Value::String(srv.command.clone()),
        );

        if !srv.args.is_empty() {
            cfg.insert("args".into(), serde_json::to_value(&srv.args)?);
        }

        if !srv.env.is_empty() {
            let env: serde_json::Map<String, serde_json::Value> = srv
                .env
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            cfg.insert("env".into(), serde_json::Value::Object(env));
        }

        mcp_servers.insert(srv.name.clone(), serde_json::Value::Object(cfg));
    }

    Ok(serde_json::to_string_pretty(
        &serde_json::json!({ "mcpServers": mcp_servers }),
    )?)
}

// ─── Tests ────────────────────────────────────────────────────────────────
