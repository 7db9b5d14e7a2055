use async_trait::async_trait;
use pipe_core::host::HostApi;
use serde_json::Value;

pub mod add_pull_request_comment;
pub mod create_branch;
pub mod create_pull_request;
pub mod get_pull_request;
pub mod get_pull_request_diff;
pub mod list_pull_request_comments;

/// One tool exposed to the assistant over MCP.
///
/// `call` returns the tool output or a message the assistant sees as an
/// error result. A `Value::String` output is sent as raw text.
#[async_trait]
pub trait PipeTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String>;
}

pub fn all_tools() -> Vec<Box<dyn PipeTool>> {
    vec![
        Box::new(get_pull_request::GetPullRequestTool),
        Box::new(get_pull_request_diff::GetPullRequestDiffTool),
        Box::new(list_pull_request_comments::ListPullRequestCommentsTool),
        Box::new(add_pull_request_comment::AddPullRequestCommentTool),
        Box::new(create_branch::CreateBranchTool),
        Box::new(create_pull_request::CreatePullRequestTool),
    ]
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("missing required argument: {key}"))
}

pub(crate) fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>, String> {
    match &args[key] {
        Value::Null => Ok(None),
        v => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| format!("argument {key} must be a non-negative integer")),
    }
}

pub(crate) fn required_u64(args: &Value, key: &str) -> Result<u64, String> {
    optional_u64(args, key)?.ok_or_else(|| format!("missing required argument: {key}"))
}

pub(crate) fn pr_id_schema() -> Value {
    serde_json::json!({
        "type": "integer",
        "description": "Pull request number"
    })
}

/// Writes need a credential; say so instead of surfacing a bare 401.
pub(crate) fn require_write_access(host: &dyn HostApi) -> Result<(), String> {
    if host.is_authenticated() {
        Ok(())
    } else {
        Err("no Bitbucket credential configured; set BITBUCKET_ACCESS_TOKEN".to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use pipe_core::config::{HostAuth, HostSettings};
    use pipe_core::host::BitbucketClient;

    pub fn client(server: &mockito::Server) -> BitbucketClient {
        BitbucketClient::new(HostSettings {
            workspace: "acme".into(),
            repo_slug: "widgets".into(),
            auth: Some(HostAuth::Token("tok".into())),
            api_base: server.url(),
        })
        .unwrap()
    }

    pub fn anonymous(server: &mockito::Server) -> BitbucketClient {
        BitbucketClient::new(HostSettings {
            workspace: "acme".into(),
            repo_slug: "widgets".into(),
            auth: None,
            api_base: server.url(),
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names_are_unique_and_prefixed() {
        let tools = all_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert!(names.iter().all(|n| n.starts_with("bitbucket_")));
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn tool_names_match_the_allow_lists() {
        let names: Vec<String> = all_tools().iter().map(|t| t.name().to_string()).collect();
        for expected in pipe_core::tools::MCP_READ_TOOLS
            .iter()
            .chain(pipe_core::tools::MCP_WRITE_TOOLS)
        {
            assert!(names.iter().any(|n| n == expected), "{expected} missing");
        }
    }

    #[test]
    fn argument_helpers_report_the_key() {
        let args = serde_json::json!({"pr_id": "seven", "body": "  "});
        assert_eq!(
            required_u64(&args, "pr_id").unwrap_err(),
            "argument pr_id must be a non-negative integer"
        );
        assert_eq!(
            required_str(&args, "body").unwrap_err(),
            "missing required argument: body"
        );
        assert_eq!(optional_u64(&args, "parent_id"), Ok(None));
    }
}
