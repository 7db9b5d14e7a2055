use super::{pr_id_schema, required_u64, PipeTool};
use async_trait::async_trait;
use pipe_core::host::HostApi;
use serde_json::Value;

pub struct GetPullRequestTool;

#[async_trait]
impl PipeTool for GetPullRequestTool {
    fn name(&self) -> &str {
        "bitbucket_get_pull_request"
    }

    fn description(&self) -> &str {
        "Get a pull request's title, description, branches, author and state"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "pr_id": pr_id_schema() },
            "required": ["pr_id"]
        })
    }

    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String> {
        let id = required_u64(&args, "pr_id")?;
        match host.get_pull_request(id).await.map_err(|e| e.to_string())? {
            Some(pr) => serde_json::to_value(pr).map_err(|e| e.to_string()),
            None => Err(format!("pull request #{id} is not available")),
        }
    }
}
