use super::{require_write_access, required_str, PipeTool};
use async_trait::async_trait;
use pipe_core::host::{HostApi, NewPullRequest};
use serde_json::Value;

pub struct CreatePullRequestTool;

const FALLBACK_DESTINATION: &str = "main";

#[async_trait]
impl PipeTool for CreatePullRequestTool {
    fn name(&self) -> &str {
        "bitbucket_create_pull_request"
    }

    fn description(&self) -> &str {
        "Open a pull request from a source branch; the destination defaults to the repository's main branch"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "description": { "type": "string" },
                "source_branch": { "type": "string" },
                "destination_branch": {
                    "type": "string",
                    "description": "Target branch (default: the repository's main branch)"
                }
            },
            "required": ["title", "source_branch"]
        })
    }

    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String> {
        let title = required_str(&args, "title")?;
        let source = required_str(&args, "source_branch")?;
        let description = args["description"].as_str().unwrap_or_default();
        require_write_access(host)?;

        let destination = match args["destination_branch"].as_str().filter(|s| !s.is_empty()) {
            Some(branch) => branch.to_string(),
            None => match host.get_repository().await {
                Ok(Some(repo)) => repo.default_branch,
                Ok(None) => FALLBACK_DESTINATION.to_string(),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read default branch");
                    FALLBACK_DESTINATION.to_string()
                }
            },
        };

        let request = NewPullRequest {
            title: title.to_string(),
            description: description.to_string(),
            source_branch: source.to_string(),
            destination_branch: destination,
        };
        let id = host
            .create_pull_request(&request)
            .await
            .map_err(|e| e.to_string())?;

        Ok(serde_json::json!({
            "pr_id": id,
            "source_branch": request.source_branch,
            "destination_branch": request.destination_branch,
        }))
    }
}
