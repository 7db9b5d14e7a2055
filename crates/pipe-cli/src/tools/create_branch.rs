use super::{require_write_access, required_str, PipeTool};
use async_trait::async_trait;
use pipe_core::host::HostApi;
use serde_json::Value;

pub struct CreateBranchTool;

#[async_trait]
impl PipeTool for CreateBranchTool {
    fn name(&self) -> &str {
        "bitbucket_create_branch"
    }

    fn description(&self) -> &str {
        "Create a branch in the repository pointing at a commit"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "New branch name, e.g. claude/fix-null-check"
                },
                "target_hash": {
                    "type": "string",
                    "description": "Commit hash the branch starts from"
                }
            },
            "required": ["name", "target_hash"]
        })
    }

    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String> {
        let name = required_str(&args, "name")?;
        let target = required_str(&args, "target_hash")?;
        require_write_access(host)?;

        host.create_branch(name, target)
            .await
            .map_err(|e| e.to_string())?;
        Ok(serde_json::json!({ "branch": name, "target_hash": target }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::client;

    #[tokio::test]
    async fn conflict_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/repositories/acme/widgets/refs/branches")
            .with_status(409)
            .with_body("branch already exists")
            .create_async()
            .await;

        let err = CreateBranchTool
            .call(
                serde_json::json!({"name": "claude/x", "target_hash": "abc123"}),
                &client(&server),
            )
            .await
            .unwrap_err();
        assert!(err.contains("409"));
        assert!(err.contains("already exists"));
    }
}
