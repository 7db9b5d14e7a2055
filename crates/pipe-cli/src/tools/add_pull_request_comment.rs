use super::{
    optional_u64, pr_id_schema, require_write_access, required_str, required_u64, PipeTool,
};
use async_trait::async_trait;
use pipe_core::context::InlineAnchor;
use pipe_core::host::HostApi;
use serde_json::Value;

pub struct AddPullRequestCommentTool;

fn line(args: &Value, key: &str) -> Result<Option<u32>, String> {
    optional_u64(args, key)?
        .map(|n| u32::try_from(n).map_err(|_| format!("argument {key} is out of range")))
        .transpose()
}

#[async_trait]
impl PipeTool for AddPullRequestCommentTool {
    fn name(&self) -> &str {
        "bitbucket_add_pull_request_comment"
    }

    fn description(&self) -> &str {
        "Add a comment to a pull request, optionally anchored to a file and line range or as a reply"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pr_id": pr_id_schema(),
                "body": {
                    "type": "string",
                    "description": "Comment text (Markdown)"
                },
                "path": {
                    "type": "string",
                    "description": "File path for an inline comment"
                },
                "from_line": {
                    "type": "integer",
                    "description": "Line in the old version of the file"
                },
                "to_line": {
                    "type": "integer",
                    "description": "Line in the new version of the file"
                },
                "parent_id": {
                    "type": "integer",
                    "description": "Comment to reply to"
                }
            },
            "required": ["pr_id", "body"]
        })
    }

    async fn call(&self, args: Value, host: &dyn HostApi) -> Result<Value, String> {
        let id = required_u64(&args, "pr_id")?;
        let body = required_str(&args, "body")?;
        let parent_id = optional_u64(&args, "parent_id")?;
        let inline = match args["path"].as_str().filter(|p| !p.is_empty()) {
            Some(path) => Some(InlineAnchor {
                path: path.to_string(),
                from_line: line(&args, "from_line")?,
                to_line: line(&args, "to_line")?,
            }),
            None => None,
        };
        require_write_access(host)?;

        let comment_id = host
            .create_pull_request_comment(id, body, inline.as_ref(), parent_id)
            .await
            .ok_or_else(|| format!("could not post comment on pull request #{id}"))?;

        Ok(serde_json::json!({
            "comment_id": comment_id,
            "pr_id": id,
            "inline": inline,
            "parent_id": parent_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{anonymous, client};
    use mockito::Matcher;

    #[tokio::test]
    async fn posts_inline_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/repositories/acme/widgets/pullrequests/3/comments")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "content": {"raw": "Use a constant here"},
                "inline": {"path": "src/main.rs", "to": 40},
                "parent": {"id": 77}
            })))
            .with_status(201)
            .with_body(r#"{"id":501}"#)
            .create_async()
            .await;

        let out = AddPullRequestCommentTool
            .call(
                serde_json::json!({
                    "pr_id": 3,
                    "body": "Use a constant here",
                    "path": "src/main.rs",
                    "to_line": 40,
                    "parent_id": 77
                }),
                &client(&server),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out["comment_id"], 501);
    }

    #[tokio::test]
    async fn refuses_without_credentials() {
        let server = mockito::Server::new_async().await;
        let err = AddPullRequestCommentTool
            .call(
                serde_json::json!({"pr_id": 3, "body": "hi"}),
                &anonymous(&server),
            )
            .await
            .unwrap_err();
        assert!(err.contains("BITBUCKET_ACCESS_TOKEN"));
    }

    #[tokio::test]
    async fn rejects_missing_body() {
        let server = mockito::Server::new_async().await;
        let err = AddPullRequestCommentTool
            .call(serde_json::json!({"pr_id": 3}), &client(&server))
            .await
            .unwrap_err();
        assert_eq!(err, "missing required argument: body");
    }
}
