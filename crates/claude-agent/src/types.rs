use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ─── Outer Message enum ───────────────────────────────────────────────────

/// Every event emitted by `claude --print --output-format stream-json`,
/// discriminated by the JSON `"type"` field.
///
/// Only the shapes the pipe acts on are modelled in detail. Anything else
/// (rate-limit notices, hook progress, future additions) lands in
/// [`Message::Unknown`] and is treated as diagnostic noise.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Returns `Some(&ResultMessage)` if this is the terminal result event.
    pub fn as_result(&self) -> Option<&ResultMessage> {
        if let Message::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

// ─── System messages ──────────────────────────────────────────────────────

/// `type = "system"`. The first one (`subtype = "init"`) announces the model
/// and the tool list the CLI actually enabled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

// ─── Assistant messages ───────────────────────────────────────────────────

/// `type = "assistant"`: one model response, possibly carrying several
/// content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Content blocks within an assistant message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic (varies per tool), so Value is correct here.
        #[serde(default)]
        input: serde_json::Value,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

// ─── User messages ────────────────────────────────────────────────────────

/// `type = "user"`: tool results fed back to the model. Content is kept as
/// raw JSON; the pipe only logs these.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    #[serde(default)]
    pub message: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

// ─── Result messages ──────────────────────────────────────────────────────

/// `type = "result"`: the terminal event of a run. `subtype` is `success`
/// or one of the `error_*` variants; `result` carries the final text only
/// for successful runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResultMessage {
    pub fn result_text(&self) -> Option<&str> {
        self.result.as_deref().filter(|t| !t.is_empty())
    }
}

// ─── QueryOptions ─────────────────────────────────────────────────────────

/// Everything needed to build one `claude --print` invocation.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Executable to run. Defaults to `claude` on `PATH`.
    pub path_to_executable: Option<PathBuf>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub max_turns: Option<u32>,
    /// Joined with commas into a single `--allowed-tools` value.
    pub allowed_tools: Vec<String>,
    /// Joined with commas into a single `--disallowed-tools` value.
    pub disallowed_tools: Vec<String>,
    /// Path to a JSON file produced by [`crate::build_mcp_config_json`].
    pub mcp_config: Option<PathBuf>,
    /// Working directory for the subprocess (the repository checkout).
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Variables stripped from the inherited environment before `env` is applied.
    pub env_remove: Vec<String>,
}

/// One stdio MCP server entry for `--mcp-config`.
#[derive(Debug, Clone, Default)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}
