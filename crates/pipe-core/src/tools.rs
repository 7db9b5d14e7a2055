//! Tool permission sets handed to the assistant CLI.

use crate::classifier::{self, RequestKind};
use crate::config::PipeConfig;
use serde::{Deserialize, Serialize};

pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "LS", "Task", "TodoWrite"];

pub const EDIT_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "Task",
    "TodoWrite",
    "Edit",
    "MultiEdit",
    "Write",
    "Bash",
];

/// Agent runs unattended: file edits, no shell.
pub const AGENT_TOOLS: &[&str] = &["Read", "Write", "Edit", "MultiEdit", "Glob", "Grep", "LS"];
pub const AGENT_BLOCKED_TOOLS: &[&str] = &["Bash", "computer"];

/// Desktop control is never offered unless explicitly pinned.
pub const COMPUTER_CONTROL: &str = "computer";

/// Name of the MCP server entry the runner registers.
pub const MCP_SERVER_NAME: &str = "bitbucket";

pub const MCP_READ_TOOLS: &[&str] = &[
    "bitbucket_get_pull_request",
    "bitbucket_get_pull_request_diff",
    "bitbucket_list_pull_request_comments",
];

pub const MCP_WRITE_TOOLS: &[&str] = &[
    "bitbucket_add_pull_request_comment",
    "bitbucket_create_branch",
    "bitbucket_create_pull_request",
];

/// `mcp__<server>__<tool>`, the name the CLI exposes an MCP tool under.
pub fn mcp_tool_name(tool: &str) -> String {
    format!("mcp__{MCP_SERVER_NAME}__{tool}")
}

/// Allow and deny lists for one run. An empty `allowed` means the CLI's
/// own defaults apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub allowed: Vec<String>,
    pub blocked: Vec<String>,
    /// Set when the classifier made the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<RequestKind>,
}

fn owned(tools: &[&str]) -> Vec<String> {
    tools.iter().map(|t| t.to_string()).collect()
}

fn with_mcp(mut tools: Vec<String>, config: &PipeConfig, include_writes: bool) -> Vec<String> {
    if !config.enable_mcp_tools {
        return tools;
    }
    tools.extend(MCP_READ_TOOLS.iter().map(|t| mcp_tool_name(t)));
    if include_writes {
        tools.extend(MCP_WRITE_TOOLS.iter().map(|t| mcp_tool_name(t)));
    }
    tools
}

pub fn read_only_set(config: &PipeConfig) -> Vec<String> {
    with_mcp(owned(READ_ONLY_TOOLS), config, false)
}

pub fn edit_set(config: &PipeConfig) -> Vec<String> {
    with_mcp(owned(EDIT_TOOLS), config, true)
}

fn merge_blocked(config: &PipeConfig, defaults: &[&str], allowed: &[String]) -> Vec<String> {
    let mut blocked = config.blocked_tools.clone();
    for tool in defaults {
        let pinned = allowed.iter().any(|a| a == tool);
        if !pinned && !blocked.iter().any(|b| b == tool) {
            blocked.push(tool.to_string());
        }
    }
    blocked
}

/// Tag and review mode policy.
///
/// Pinned `ALLOWED_TOOLS` are used as-is. Otherwise an extracted request is
/// classified when auto-detection is on; without a request the read-only
/// set applies. With auto-detection off nothing is allowed explicitly.
pub fn select_tools(config: &PipeConfig, request: Option<&str>) -> ToolSelection {
    if !config.allowed_tools.is_empty() {
        return ToolSelection {
            blocked: merge_blocked(config, &[COMPUTER_CONTROL], &config.allowed_tools),
            allowed: config.allowed_tools.clone(),
            request_kind: None,
        };
    }

    if !config.auto_detect_actionable {
        return ToolSelection {
            allowed: Vec::new(),
            blocked: merge_blocked(config, &[COMPUTER_CONTROL], &[]),
            request_kind: None,
        };
    }

    let kind = request.map(classifier::classify);
    let allowed = match kind {
        Some(RequestKind::Actionable) => edit_set(config),
        Some(RequestKind::Informational) | None => read_only_set(config),
    };
    if let Some(kind) = kind {
        tracing::info!(kind = %kind, "classified request");
    }
    ToolSelection {
        blocked: merge_blocked(config, &[COMPUTER_CONTROL], &allowed),
        allowed,
        request_kind: kind,
    }
}

/// Agent mode: a fixed set, never classified.
pub fn agent_tools(config: &PipeConfig) -> ToolSelection {
    let allowed = with_mcp(owned(AGENT_TOOLS), config, true);
    ToolSelection {
        blocked: merge_blocked(config, AGENT_BLOCKED_TOOLS, &[]),
        allowed,
        request_kind: None,
    }
}
