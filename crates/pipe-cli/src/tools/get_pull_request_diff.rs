use super::{pr_id_schema, required_u64, PipeTool};
use async_trait::async_trait;
use pipe_core::host::HostApi;
use serde_json::Value;

pub struct GetPullRequestDiffTool;

#[async_trait]
impl PipeTool for GetPullRequestDiffTool {
    fn name(&self) -> &str {
        "bitbucket_get_pull_request_diff"
    }

    fn description(&self) -> &str {
        "Get the unified diff of a pull request"
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
        let diff = host
            .get_pull_request_diff(id)
            .await
            .map_err(|e| e.to_string())?;
        if diff.is_empty() {
            return Ok(Value::String(format!("pull request #{id} has no diff")));
        }
        Ok(Value::String(diff))
    }
}
